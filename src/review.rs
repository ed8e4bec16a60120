//! Buyer reviews of purchased projects
use super::account::Caller;
use super::error::{FieldError, MarketError, MarketResult};
use super::project::Project;
use super::store::{REVIEWS, Record, Store};
use super::types::TimeStamp;
use super::utils;
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const MAX_COMMENT_LEN: usize = 2_000;

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[n(0)]
    #[serde(skip)]
    pub slot: String, // "{project}/{reviewer}", one review per pair
    #[n(1)]
    pub id: String,
    #[n(2)]
    pub project: String,
    #[n(3)]
    pub reviewer: String,
    #[n(4)]
    pub rating: u8,
    #[n(5)]
    pub comment: Option<String>,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

impl Record for Review {
    const TREE: &'static str = REVIEWS;
    const ENTITY: &'static str = "review";

    fn key(&self) -> &str {
        &self.slot
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NewReview {
    pub rating: u8,
    pub comment: Option<String>,
}

impl NewReview {
    pub fn validate(&self) -> MarketResult<()> {
        let mut errors = vec![];
        if !(1..=5).contains(&self.rating) {
            errors.push(FieldError::new("rating", "Rating must be between 1 and 5"));
        }
        if self
            .comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN)
        {
            errors.push(FieldError::new(
                "comment",
                format!("Comment must be at most {MAX_COMMENT_LEN} characters"),
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MarketError::validation(errors))
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub reviews: Vec<Review>,
    pub count: usize,
    pub average_rating: Option<f64>,
}

pub struct ReviewService {
    store: Store,
}

impl ReviewService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Only the buyer a project was sold to may review it, once.
    pub fn create(&self, caller: &Caller, project_id: &str, review: NewReview) -> MarketResult<Review> {
        review.validate()?;
        let project = self.store.fetch::<Project>(project_id)?;
        if project.sold_to.as_deref() != Some(caller.user_id.as_str()) {
            return Err(MarketError::Forbidden(
                "only the buyer of this project may review it".into(),
            ));
        }

        let record = Review {
            slot: format!("{project_id}/{}", caller.user_id),
            id: utils::new_uuid_to_bech32("review_")?,
            project: project_id.to_string(),
            reviewer: caller.user_id.clone(),
            rating: review.rating,
            comment: review
                .comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            created_at: TimeStamp::new(),
        };
        self.store.create(&record).map_err(|err| match err {
            MarketError::Conflict(_) => {
                MarketError::Conflict("you have already reviewed this project".into())
            }
            other => other,
        })?;

        tracing::info!(project_id, reviewer = %caller.user_id, rating = record.rating, "review added");
        Ok(record)
    }

    pub fn list(&self, project_id: &str) -> MarketResult<ReviewSummary> {
        self.store.fetch::<Project>(project_id)?;
        let mut reviews = self.store.scan::<Review, _>(|r| r.project == project_id)?;
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let count = reviews.len();
        let average_rating = (count > 0).then(|| {
            reviews.iter().map(|r| f64::from(r.rating)).sum::<f64>() / count as f64
        });
        Ok(ReviewSummary {
            reviews,
            count,
            average_rating,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_must_be_one_to_five() {
        for rating in [0, 6] {
            let review = NewReview {
                rating,
                comment: None,
            };
            assert!(matches!(review.validate(), Err(MarketError::Validation { .. })));
        }
        assert!(NewReview { rating: 5, comment: Some("great".into()) }.validate().is_ok());
    }
}
