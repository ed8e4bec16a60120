//! Domain error taxonomy shared by every service.
//!
//! The variants are HTTP-agnostic; `http::response` maps them onto status codes
//! and the JSON envelope.
use serde::Serialize;
use std::fmt;

pub type MarketResult<T> = Result<T, MarketError>;

/// A single per-field validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(String),
    #[error("payment gateway {category}: {message}")]
    Gateway {
        category: GatewayCategory,
        message: String,
    },
    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

/// Client-visible class of a gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayCategory {
    Declined,
    Timeout,
    Unavailable,
}

impl fmt::Display for GatewayCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declined => write!(f, "declined"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl MarketError {
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: "Validation failed".into(),
            errors,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Conflict raised when an action is attempted from the wrong status.
    pub fn invalid_transition(action: &str, current: impl fmt::Display, allowed: &[&str]) -> Self {
        Self::Conflict(format!(
            "cannot {action} project in status '{current}' (allowed: {})",
            allowed.join(", ")
        ))
    }
}

impl From<sled::Error> for MarketError {
    fn from(err: sled::Error) -> Self {
        Self::Unexpected(anyhow::Error::new(err).context("entity store failure"))
    }
}

impl From<minicbor::decode::Error> for MarketError {
    fn from(err: minicbor::decode::Error) -> Self {
        Self::Unexpected(anyhow::Error::new(err).context("failed to decode stored record"))
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<minicbor::encode::Error<E>>
    for MarketError
{
    fn from(err: minicbor::encode::Error<E>) -> Self {
        Self::Unexpected(anyhow::Error::new(err).context("failed to encode record"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_current_and_allowed_statuses() {
        let err = MarketError::invalid_transition("approve", "draft", &["submitted"]);
        assert_eq!(
            err.to_string(),
            "cannot approve project in status 'draft' (allowed: submitted)"
        );
    }

    #[test]
    fn not_found_message() {
        let err = MarketError::not_found("project", "project_1abc");
        assert_eq!(err.to_string(), "project with id project_1abc not found");
    }
}
