//! Users, roles and bearer credentials.
//!
//! Authentication proper lives at the HTTP edge; this module only resolves an
//! opaque token into a [`Caller`] that is passed explicitly into every
//! lifecycle, marketplace and payment operation.
use super::error::{FieldError, MarketError, MarketResult};
use super::store::{EMAILS, Record, Store, USERS, abort, tx_get, tx_put};
use super::types::TimeStamp;
use super::utils;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[n(0)]
    Buyer,
    #[n(1)]
    Seller,
    #[n(2)]
    Admin,
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub role: Role,
    #[n(4)]
    pub email_verified: bool,
    #[n(5)]
    pub blocked: bool,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub last_login_at: Option<TimeStamp<Utc>>,
}

// keyed by the sha256 digest of the bearer token
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone)]
pub struct ApiToken {
    #[n(0)]
    pub digest: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub expires_at: TimeStamp<Utc>,
}

impl Record for User {
    const TREE: &'static str = super::store::USERS;
    const ENTITY: &'static str = "user";

    fn key(&self) -> &str {
        &self.id
    }
}

/// `email → user id`; one account per address.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone)]
pub struct EmailIndex {
    #[n(0)]
    pub email: String,
    #[n(1)]
    pub user_id: String,
}

impl Record for EmailIndex {
    const TREE: &'static str = EMAILS;
    const ENTITY: &'static str = "email";

    fn key(&self) -> &str {
        &self.email
    }
}

impl Record for ApiToken {
    const TREE: &'static str = super::store::TOKENS;
    const ENTITY: &'static str = "token";

    fn key(&self) -> &str {
        &self.digest
    }
}

/// The authenticated identity on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
    pub fn is(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// A freshly issued credential. The raw token is only ever returned here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: TimeStamp<Utc>,
}

pub struct AccountService {
    store: Store,
    token_ttl: Duration,
}

impl AccountService {
    pub fn new(store: Store, token_ttl: Duration) -> Self {
        Self { store, token_ttl }
    }

    /// Self-service signup. Admins are only ever created by bootstrap or promotion.
    pub fn register(
        &self,
        email: &str,
        name: &str,
        role: Role,
    ) -> MarketResult<(User, IssuedToken)> {
        let email = email.trim().to_lowercase();
        let name = name.trim();

        let mut errors = vec![];
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            errors.push(FieldError::new("email", "A valid email address is required"));
        }
        if name.is_empty() {
            errors.push(FieldError::new("name", "Name is required"));
        }
        if role == Role::Admin {
            errors.push(FieldError::new("role", "Role must be buyer or seller"));
        }
        if !errors.is_empty() {
            return Err(MarketError::validation(errors));
        }

        let user = self.insert_user(&email, name, role)?;
        let token = self.issue_token(&user.id)?;
        Ok((user, token))
    }

    fn insert_user(&self, email: &str, name: &str, role: Role) -> MarketResult<User> {
        let user = User {
            id: utils::new_uuid_to_bech32("user_")?,
            email: email.to_string(),
            name: name.to_string(),
            role,
            email_verified: false,
            blocked: false,
            created_at: TimeStamp::new(),
            last_login_at: None,
        };
        let index = EmailIndex {
            email: user.email.clone(),
            user_id: user.id.clone(),
        };
        self.store.transact(&[USERS, EMAILS], |trees| {
            let (users, emails) = (&trees[0], &trees[1]);
            if tx_get::<EmailIndex>(emails, &index.email)?.is_some() {
                return Err(abort(MarketError::Conflict(format!(
                    "an account for {email} already exists"
                ))));
            }
            tx_put(emails, &index)?;
            tx_put(users, &user)?;
            Ok(())
        })?;
        tracing::info!(user_id = %user.id, role = ?role, "user registered");
        Ok(user)
    }

    pub fn find_by_email(&self, email: &str) -> MarketResult<Option<User>> {
        let email = email.trim().to_lowercase();
        match self.store.get::<EmailIndex>(&email)? {
            Some(index) => self.store.get(&index.user_id),
            None => Ok(None),
        }
    }

    pub fn get(&self, user_id: &str) -> MarketResult<User> {
        self.store.fetch(user_id)
    }

    /// Issues a new bearer token for `user_id` and stamps the login time.
    pub fn issue_token(&self, user_id: &str) -> MarketResult<IssuedToken> {
        self.store.update_with::<User, _>(user_id, |mut user| {
            user.last_login_at = Some(TimeStamp::new());
            Ok(user)
        })?;

        let token = utils::new_secret_token();
        let expires_at: TimeStamp<Utc> = (Utc::now() + self.token_ttl).into();
        self.store.create(&ApiToken {
            digest: utils::token_digest(&token),
            user_id: user_id.to_string(),
            expires_at: expires_at.clone(),
        })?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Resolves a bearer token. Unknown or expired tokens are `Unauthorized`,
    /// blocked users are `Forbidden`.
    pub fn authenticate(&self, token: &str) -> MarketResult<Caller> {
        let digest = utils::token_digest(token);
        let record = self
            .store
            .get::<ApiToken>(&digest)?
            .ok_or_else(|| MarketError::Unauthorized("Invalid credentials".into()))?;

        if record.expires_at.to_datetime_utc() <= Utc::now() {
            self.store.remove::<ApiToken>(&digest)?;
            return Err(MarketError::Unauthorized("Credentials expired".into()));
        }

        let user = self
            .store
            .get::<User>(&record.user_id)?
            .ok_or_else(|| MarketError::Unauthorized("Invalid credentials".into()))?;
        if user.blocked {
            return Err(MarketError::Forbidden("Account is blocked".into()));
        }

        Ok(Caller::new(user.id, user.role))
    }

    /// Ensures an admin account exists and accepts `token`. Used at start-up.
    pub fn bootstrap_admin(&self, email: &str, token: &str) -> MarketResult<User> {
        let user = match self.find_by_email(email)? {
            Some(user) => self.store.update_with::<User, _>(&user.id, |mut user| {
                user.role = Role::Admin;
                user.blocked = false;
                user.email_verified = true;
                Ok(user)
            })?,
            None => {
                let user = self.insert_user(&email.trim().to_lowercase(), "Administrator", Role::Admin)?;
                self.store.update_with::<User, _>(&user.id, |mut user| {
                    user.email_verified = true;
                    Ok(user)
                })?
            }
        };

        let digest = utils::token_digest(token);
        let expires_at: TimeStamp<Utc> = (Utc::now() + self.token_ttl).into();
        self.store.put(&ApiToken {
            digest,
            user_id: user.id.clone(),
            expires_at,
        })?;
        tracing::info!(user_id = %user.id, "bootstrap admin ready");
        Ok(user)
    }

    pub fn set_role(&self, caller: &Caller, user_id: &str, role: Role) -> MarketResult<User> {
        require_admin(caller)?;
        let user = self.store.update_with::<User, _>(user_id, |mut user| {
            user.role = role;
            Ok(user)
        })?;
        tracing::info!(admin = %caller.user_id, user_id, role = ?role, "role changed");
        Ok(user)
    }

    pub fn set_blocked(&self, caller: &Caller, user_id: &str, blocked: bool) -> MarketResult<User> {
        require_admin(caller)?;
        if caller.is(user_id) {
            return Err(MarketError::BadRequest("Admins cannot block themselves".into()));
        }
        let user = self.store.update_with::<User, _>(user_id, |mut user| {
            user.blocked = blocked;
            Ok(user)
        })?;
        tracing::info!(admin = %caller.user_id, user_id, blocked, "block flag changed");
        Ok(user)
    }

    pub fn verify_email(&self, caller: &Caller, user_id: &str) -> MarketResult<User> {
        require_admin(caller)?;
        self.store.update_with::<User, _>(user_id, |mut user| {
            user.email_verified = true;
            Ok(user)
        })
    }
}

pub(crate) fn require_admin(caller: &Caller) -> MarketResult<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(MarketError::Forbidden("Admin role required".into()))
    }
}
