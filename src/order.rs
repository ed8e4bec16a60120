//! Orders: one record per purchase attempt, plus the two indexes that keep
//! them unique per (buyer, project) and per gateway transaction.
use super::error::{FieldError, MarketError, MarketResult};
use super::project::is_plausible_email;
use super::store::{OPEN_ORDERS, ORDERS, Record, TRANSACTIONS};
use super::types::{Currency, TimeStamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Processing,
    #[n(2)]
    Paid,
    #[n(3)]
    Failed,
    #[n(4)]
    Refunded,
}

impl OrderStatus {
    /// Pending and processing orders are still open for the same buyer.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// Billing details captured when the buyer pays.
#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BillingDetails {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub address: Option<String>,
    #[n(3)]
    pub city: Option<String>,
    #[n(4)]
    pub postal_code: Option<String>,
    #[n(5)]
    pub country: Option<String>, // ISO 3166-1 alpha-2
}

impl BillingDetails {
    pub fn validate(&self) -> MarketResult<()> {
        let mut errors = vec![];
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("billing.name", "Billing name is required"));
        }
        if !is_plausible_email(&self.email) {
            errors.push(FieldError::new("billing.email", "Billing email is invalid"));
        }
        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                errors.push(FieldError::new(
                    "billing.country",
                    "Country must be a two letter code",
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MarketError::validation(errors))
        }
    }
}

/// One entry of the gateway conversation kept on the order. Server side only.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct GatewayLogEntry {
    #[n(0)]
    pub at: TimeStamp<Utc>,
    #[n(1)]
    pub event: String,
    #[n(2)]
    pub detail: String,
}

impl GatewayLogEntry {
    pub fn new(event: &str, detail: impl Into<String>) -> Self {
        Self {
            at: TimeStamp::new(),
            event: event.to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub buyer: String,
    #[n(2)]
    pub project: String,
    #[n(3)]
    pub amount: u64, // copied from the project at creation, never from the client
    #[n(4)]
    pub currency: Currency,
    #[n(5)]
    pub status: OrderStatus,
    #[n(6)]
    pub transaction_id: Option<String>,
    #[n(7)]
    pub billing: Option<BillingDetails>,
    #[n(8)]
    #[serde(skip)]
    pub gateway_log: Vec<GatewayLogEntry>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub updated_at: TimeStamp<Utc>,
    #[n(11)]
    pub paid_at: Option<TimeStamp<Utc>>,
}

impl Record for Order {
    const TREE: &'static str = ORDERS;
    const ENTITY: &'static str = "order";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Order {
    pub(crate) fn log(&mut self, entry: GatewayLogEntry) {
        self.gateway_log.push(entry);
        self.updated_at = TimeStamp::new();
    }
}

/// `(buyer, project) → order id` for the latest order of that pair.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub order_id: String,
}

impl OpenOrder {
    pub fn key_for(buyer: &str, project: &str) -> String {
        format!("{buyer}/{project}")
    }
}

impl Record for OpenOrder {
    const TREE: &'static str = OPEN_ORDERS;
    const ENTITY: &'static str = "open order";

    fn key(&self) -> &str {
        &self.key
    }
}

/// `gateway transaction id → order id`; a transaction settles one order only.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SettledTransaction {
    #[n(0)]
    pub transaction_id: String,
    #[n(1)]
    pub order_id: String,
}

impl Record for SettledTransaction {
    const TREE: &'static str = TRANSACTIONS;
    const ENTITY: &'static str = "transaction";

    fn key(&self) -> &str {
        &self.transaction_id
    }
}
