//! Project records, their status and the draft used to author them
use super::error::{FieldError, MarketError, MarketResult};
use super::store::{PROJECTS, Record};
use super::types::{Category, Currency, TimeStamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_TITLE_LEN: usize = 120;
pub const MAX_DESCRIPTION_LEN: usize = 5_000;
pub const MAX_MEDIA: usize = 10;

/// Review status. `pending` is accepted as an alias of `draft` on input.
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[n(0)]
    #[serde(alias = "pending")]
    Draft,
    #[n(1)]
    Submitted,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 4] = [
        ProjectStatus::Draft,
        ProjectStatus::Submitted,
        ProjectStatus::Approved,
        ProjectStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub owner: String, // immutable after creation
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub description: String,
    #[n(4)]
    pub category: Category,
    #[n(5)]
    pub price: u64, // minor units
    #[n(6)]
    pub currency: Currency,
    #[n(7)]
    pub delivery_days: u32,
    #[n(8)]
    pub media: Vec<String>,
    #[n(9)]
    pub contact_email: Option<String>,
    #[n(10)]
    pub status: ProjectStatus,
    #[n(11)]
    pub rejection_reason: Option<String>,
    #[n(12)]
    pub reviewed_by: Option<String>,
    #[n(13)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub submission_date: Option<TimeStamp<Utc>>,
    #[n(15)]
    pub is_for_sale: bool,
    #[n(16)]
    pub sold_to: Option<String>,
    #[n(17)]
    pub sold_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub created_at: TimeStamp<Utc>,
    #[n(19)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record for Project {
    const TREE: &'static str = PROJECTS;
    const ENTITY: &'static str = "project";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Project {
    /// A fresh draft owned by `owner`, built from an already validated draft.
    pub(crate) fn from_draft(id: String, owner: String, draft: ValidDraft) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            owner,
            title: draft.title,
            description: draft.description,
            category: draft.category,
            price: draft.price,
            currency: draft.currency,
            delivery_days: draft.delivery_days,
            media: draft.media,
            contact_email: draft.contact_email,
            status: ProjectStatus::Draft,
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            submission_date: None,
            is_for_sale: false,
            sold_to: None,
            sold_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub(crate) fn apply_draft(&mut self, draft: ValidDraft) {
        self.title = draft.title;
        self.description = draft.description;
        self.category = draft.category;
        self.price = draft.price;
        self.currency = draft.currency;
        self.delivery_days = draft.delivery_days;
        self.media = draft.media;
        self.contact_email = draft.contact_email;
        self.updated_at = TimeStamp::new();
    }

    pub fn is_sold(&self) -> bool {
        self.sold_to.is_some()
    }

    /// Listed, approved and not yet sold.
    pub fn is_purchasable(&self) -> bool {
        self.is_for_sale && self.status == ProjectStatus::Approved && self.sold_to.is_none()
    }

    /// Marketplace invariants that must hold for every stored project.
    pub fn check_invariants(&self) -> bool {
        let sold_ok = self.sold_to.is_none()
            || (!self.is_for_sale
                && self.status == ProjectStatus::Approved
                && self.sold_at.is_some());
        let listed_ok = !self.is_for_sale
            || (self.status == ProjectStatus::Approved && self.sold_to.is_none());
        let rejection_ok =
            self.rejection_reason.is_none() || self.status == ProjectStatus::Rejected;
        sold_ok && listed_ok && rejection_ok
    }
}

/// Author-supplied project fields, used for create and edit.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub price: Option<u64>,
    pub currency: Option<Currency>,
    pub delivery_days: Option<u32>,
    #[serde(default)]
    pub media: Vec<String>,
    pub contact_email: Option<String>,
}

/// A draft that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidDraft {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub price: u64,
    pub currency: Currency,
    pub delivery_days: u32,
    pub media: Vec<String>,
    pub contact_email: Option<String>,
}

impl ProjectDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn set_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
    pub fn set_price(mut self, price: u64) -> Self {
        self.price = Some(price);
        self
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }
    pub fn set_delivery_days(mut self, days: u32) -> Self {
        self.delivery_days = Some(days);
        self
    }
    pub fn add_media(mut self, reference: &str) -> Self {
        self.media.push(reference.to_string());
        self
    }
    pub fn set_contact_email(mut self, email: &str) -> Self {
        self.contact_email = Some(email.to_string());
        self
    }

    // Checks every field and collects one message per offending field
    pub fn validate(&self) -> MarketResult<ValidDraft> {
        let mut errors = vec![];

        let title = self.title.as_deref().map(str::trim).unwrap_or_default();
        if title.is_empty() {
            errors.push(FieldError::new("title", "Title is required"));
        } else if title.chars().count() > MAX_TITLE_LEN {
            errors.push(FieldError::new(
                "title",
                format!("Title must be at most {MAX_TITLE_LEN} characters"),
            ));
        }

        let description = self.description.as_deref().map(str::trim).unwrap_or_default();
        if description.is_empty() {
            errors.push(FieldError::new("description", "Description is required"));
        } else if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(FieldError::new(
                "description",
                format!("Description must be at most {MAX_DESCRIPTION_LEN} characters"),
            ));
        }

        if self.category.is_none() {
            errors.push(FieldError::new("category", "Category is required"));
        }
        match self.price {
            None => errors.push(FieldError::new("price", "Price is required")),
            Some(0) => errors.push(FieldError::new("price", "Price must be greater than zero")),
            Some(_) => {}
        }
        match self.delivery_days {
            None => errors.push(FieldError::new("deliveryDays", "Delivery estimate is required")),
            Some(0) => errors.push(FieldError::new(
                "deliveryDays",
                "Delivery estimate must be at least one day",
            )),
            Some(_) => {}
        }
        if self.media.len() > MAX_MEDIA {
            errors.push(FieldError::new(
                "media",
                format!("At most {MAX_MEDIA} media references are allowed"),
            ));
        }
        if self.media.iter().any(|m| m.trim().is_empty()) {
            errors.push(FieldError::new("media", "Media references must not be empty"));
        }
        if let Some(email) = &self.contact_email {
            if !is_plausible_email(email) {
                errors.push(FieldError::new("contactEmail", "Contact email is invalid"));
            }
        }

        if !errors.is_empty() {
            return Err(MarketError::validation(errors));
        }

        Ok(ValidDraft {
            title: title.to_string(),
            description: description.to_string(),
            category: self.category.unwrap_or(Category::Other),
            price: self.price.unwrap_or_default(),
            currency: self.currency.unwrap_or_default(),
            delivery_days: self.delivery_days.unwrap_or(1),
            media: self.media.iter().map(|m| m.trim().to_string()).collect(),
            contact_email: self.contact_email.as_ref().map(|e| e.trim().to_lowercase()),
        })
    }
}

pub(crate) fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ProjectDraft {
        ProjectDraft::new()
            .set_title("Inventory tracker")
            .set_description("A small stock keeping app")
            .set_category(Category::WebApp)
            .set_price(10_000)
            .set_delivery_days(7)
    }

    #[test]
    fn complete_draft_validates() {
        let valid = complete().validate().unwrap();
        assert_eq!(valid.currency, Currency::USD);
        assert_eq!(valid.price, 10_000);
    }

    #[test]
    fn empty_draft_reports_every_missing_field() {
        match ProjectDraft::new().validate() {
            Err(MarketError::Validation { errors, .. }) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(
                    fields,
                    ["title", "description", "category", "price", "deliveryDays"]
                );
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn whitespace_title_is_rejected() {
        assert!(complete().set_title("   ").validate().is_err());
    }

    #[test]
    fn pending_is_an_alias_for_draft() {
        let status: ProjectStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(status, ProjectStatus::Draft);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"draft\"");
    }

    #[test]
    fn unknown_fields_are_refused() {
        let res: Result<ProjectDraft, _> =
            serde_json::from_str(r#"{"title":"x","status":"approved"}"#);
        assert!(res.is_err());
    }
}
