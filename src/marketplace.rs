//! Marketplace listing and direct purchase.
//!
//! A listing is an approved project with `is_for_sale` set. The sale itself is
//! [`sell`], a pure transition applied either through a compare-and-swap on
//! the project (direct purchase) or inside the payment finalization
//! transaction. Both paths share the same preconditions.
use super::account::Caller;
use super::error::{FieldError, MarketError, MarketResult};
use super::lifecycle::require_owner;
use super::notification::{NotificationKind, NotificationService};
use super::project::{MAX_DESCRIPTION_LEN, MAX_TITLE_LEN, Project, ProjectStatus, is_plausible_email};
use super::store::Store;
use super::types::TimeStamp;
use super::visibility::{Page, ProjectFilter, ProjectQuery};
use serde::Deserialize;

/// Fields an owner may change on a live listing.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<u64>,
    pub contact_email: Option<String>,
}

impl ListingUpdate {
    pub fn validate(&self) -> MarketResult<()> {
        let mut errors = vec![];
        if let Some(title) = &self.title {
            let title = title.trim();
            if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
                errors.push(FieldError::new(
                    "title",
                    format!("Title must be 1 to {MAX_TITLE_LEN} characters"),
                ));
            }
        }
        if let Some(description) = &self.description {
            let description = description.trim();
            if description.is_empty() || description.chars().count() > MAX_DESCRIPTION_LEN {
                errors.push(FieldError::new(
                    "description",
                    format!("Description must be 1 to {MAX_DESCRIPTION_LEN} characters"),
                ));
            }
        }
        if self.price == Some(0) {
            errors.push(FieldError::new("price", "Price must be greater than zero"));
        }
        if let Some(email) = &self.contact_email {
            if !is_plausible_email(email) {
                errors.push(FieldError::new("contactEmail", "Contact email is invalid"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MarketError::validation(errors))
        }
    }

    fn apply(&self, project: &mut Project) {
        if let Some(title) = &self.title {
            project.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            project.description = description.trim().to_string();
        }
        if let Some(price) = self.price {
            project.price = price;
        }
        if let Some(email) = &self.contact_email {
            project.contact_email = Some(email.trim().to_lowercase());
        }
        project.updated_at = TimeStamp::new();
    }
}

/// Checks that `buyer` may buy `project` right now.
pub fn ensure_purchasable(project: &Project, buyer: &str) -> MarketResult<()> {
    if project.owner == buyer {
        return Err(MarketError::BadRequest(
            "you cannot purchase your own project".into(),
        ));
    }
    if project.is_sold() {
        return Err(MarketError::Conflict(format!(
            "project {} has already been sold",
            project.id
        )));
    }
    if !project.is_purchasable() {
        return Err(MarketError::Conflict(format!(
            "project {} is not listed for sale",
            project.id
        )));
    }
    Ok(())
}

/// The sale transition: the project leaves the marketplace, sold to `buyer`.
pub fn sell(mut project: Project, buyer: &str) -> MarketResult<Project> {
    ensure_purchasable(&project, buyer)?;
    let now = TimeStamp::new();
    project.sold_to = Some(buyer.to_string());
    project.sold_at = Some(now.clone());
    project.is_for_sale = false;
    project.updated_at = now;
    Ok(project)
}

pub(crate) fn announce_sale(notifications: &NotificationService, project: &Project, buyer: &str) {
    notifications.notify(
        &project.owner,
        NotificationKind::ProjectSold,
        &project.id,
        format!("Your project \"{}\" was sold", project.title),
    );
    notifications.notify(
        buyer,
        NotificationKind::PurchaseConfirmed,
        &project.id,
        format!("You purchased \"{}\"", project.title),
    );
}

pub struct MarketplaceService {
    store: Store,
    notifications: NotificationService,
}

impl MarketplaceService {
    pub fn new(store: Store, notifications: NotificationService) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// List an approved, unlisted, unsold project. Optional listing fields are
    /// applied in the same update.
    pub fn list(&self, caller: &Caller, project_id: &str, changes: ListingUpdate) -> MarketResult<Project> {
        changes.validate()?;

        let project = self.store.update_with::<Project, _>(project_id, |mut project| {
            require_owner(caller, &project, "list")?;
            if project.is_sold() {
                return Err(MarketError::Conflict(format!(
                    "project {} has already been sold",
                    project.id
                )));
            }
            if project.is_for_sale {
                return Err(MarketError::Conflict(format!(
                    "project {} is already listed",
                    project.id
                )));
            }
            if project.status != ProjectStatus::Approved {
                return Err(MarketError::invalid_transition("list", project.status, &["approved"]));
            }

            changes.apply(&mut project);
            project.is_for_sale = true;
            Ok(project)
        })?;

        tracing::info!(project_id, price = project.price, "project listed");
        Ok(project)
    }

    pub fn update_listing(
        &self,
        caller: &Caller,
        project_id: &str,
        changes: ListingUpdate,
    ) -> MarketResult<Project> {
        changes.validate()?;

        let project = self.store.update_with::<Project, _>(project_id, |mut project| {
            require_owner(caller, &project, "update the listing of")?;
            if !project.is_purchasable() {
                return Err(MarketError::Conflict(format!(
                    "project {} is not an active listing",
                    project.id
                )));
            }
            changes.apply(&mut project);
            Ok(project)
        })?;

        tracing::info!(project_id, "listing updated");
        Ok(project)
    }

    /// Take a listing off the marketplace without deleting the project.
    pub fn unlist(&self, caller: &Caller, project_id: &str) -> MarketResult<Project> {
        let project = self.store.update_with::<Project, _>(project_id, |mut project| {
            if !caller.is_admin() {
                require_owner(caller, &project, "unlist")?;
            }
            if !project.is_for_sale {
                return Err(MarketError::Conflict(format!(
                    "project {} is not listed",
                    project.id
                )));
            }
            project.is_for_sale = false;
            project.updated_at = TimeStamp::new();
            Ok(project)
        })?;

        tracing::info!(project_id, by = %caller.user_id, "project unlisted");
        Ok(project)
    }

    /// Direct purchase without the payment flow. Concurrent buyers race on
    /// the same compare-and-swap; exactly one wins, the rest see `Conflict`.
    pub fn purchase(&self, caller: &Caller, project_id: &str) -> MarketResult<Project> {
        let project = self
            .store
            .update_with::<Project, _>(project_id, |project| sell(project, &caller.user_id))
            .inspect_err(|err| {
                tracing::debug!(project_id, buyer = %caller.user_id, error = %err, "purchase refused");
            })?;

        tracing::info!(project_id, buyer = %caller.user_id, "project sold");
        announce_sale(&self.notifications, &project, &caller.user_id);
        Ok(project)
    }

    /// A single active listing; anything else is reported as missing.
    pub fn get_listing(&self, project_id: &str) -> MarketResult<Project> {
        let project = self.store.fetch::<Project>(project_id)?;
        if project.is_purchasable() {
            Ok(project)
        } else {
            Err(MarketError::not_found("listing", project_id))
        }
    }

    pub fn browse(&self, query: &ProjectQuery) -> MarketResult<Page<Project>> {
        query.validate()?;
        let filter = ProjectFilter::for_marketplace(query);
        let matched = self.store.scan::<Project, _>(|p| filter.matches(p))?;
        Ok(filter.paginate(matched))
    }
}
