//! Request extractors resolving the bearer credential into a [`Caller`].
use super::AppState;
use crate::account::Caller;
use crate::error::MarketError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| MarketError::Unauthorized("Missing authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| {
                MarketError::Unauthorized(
                    "Invalid authorization format. Expected 'Bearer <token>'".into(),
                )
            })?
            .trim();
        if token.is_empty() {
            return Err(MarketError::Unauthorized("Empty bearer token".into()));
        }

        Ok(Self(token.to_string()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = BearerToken::from_request_parts(parts, state).await?;
        state.accounts.authenticate(&bearer.0)
    }
}

/// Authentication for public endpoints whose result depends on who asks.
/// No header means anonymous; a header with a bad token is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<Caller>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(axum::http::header::AUTHORIZATION) {
            return Ok(Self(None));
        }
        Caller::from_request_parts(parts, state).await.map(|c| Self(Some(c)))
    }
}
