//! Read visibility policy and project queries.
//!
//! Everything here is pure: a caller and a set of requested filters become a
//! [`ProjectFilter`], which the store then applies record by record. The same
//! filter serves list and single-item reads so the two cannot disagree.
use super::account::Caller;
use super::error::{FieldError, MarketError, MarketResult};
use super::project::{Project, ProjectStatus};
use super::types::Category;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_PAGE_SIZE: usize = 12;
pub const MAX_PAGE_SIZE: usize = 100;

/// Which projects a caller may see at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Unauthenticated: approved projects only.
    Public,
    /// Authenticated non-admin: approved projects plus their own.
    Member(String),
    /// Admin: everything.
    Everything,
}

impl Visibility {
    pub fn for_caller(caller: Option<&Caller>) -> Self {
        match caller {
            None => Self::Public,
            Some(caller) if caller.is_admin() => Self::Everything,
            Some(caller) => Self::Member(caller.user_id.clone()),
        }
    }

    pub fn permits(&self, project: &Project) -> bool {
        match self {
            Self::Everything => true,
            Self::Member(user_id) => {
                project.status == ProjectStatus::Approved || &project.owner == user_id
            }
            Self::Public => project.status == ProjectStatus::Approved,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    Price,
    Title,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Query-string filters accepted by list, browse and search endpoints.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub category: Option<Category>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub search: Option<String>,
    pub status: Option<ProjectStatus>,
    pub owner: Option<String>,
    pub sort_by: Option<SortField>,
    pub order: Option<SortOrder>,
}

impl ProjectQuery {
    pub fn validate(&self) -> MarketResult<()> {
        let mut errors = vec![];
        if self.page == Some(0) {
            errors.push(FieldError::new("page", "Page starts at 1"));
        }
        match self.limit {
            Some(0) => errors.push(FieldError::new("limit", "Limit must be at least 1")),
            Some(n) if n > MAX_PAGE_SIZE => errors.push(FieldError::new(
                "limit",
                format!("Limit must be at most {MAX_PAGE_SIZE}"),
            )),
            _ => {}
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                errors.push(FieldError::new(
                    "minPrice",
                    "Minimum price exceeds maximum price",
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

/// Restricts results to the purchasable subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    AnyStatus,
    ForSale,
}

/// A fully resolved store query.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectFilter {
    pub visibility: Visibility,
    pub scope: Scope,
    pub category: Option<Category>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub search: Option<String>,
    pub status: Option<ProjectStatus>,
    pub owner: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub page: usize,
    pub limit: usize,
}

impl ProjectFilter {
    /// Filter for the project endpoints, honouring the caller's visibility.
    pub fn for_projects(caller: Option<&Caller>, query: &ProjectQuery) -> Self {
        Self::build(Visibility::for_caller(caller), Scope::AnyStatus, query)
    }

    /// Filter for public browse/search: approved, listed and unsold only.
    /// Status and owner filters are ignored here.
    pub fn for_marketplace(query: &ProjectQuery) -> Self {
        let mut filter = Self::build(Visibility::Public, Scope::ForSale, query);
        filter.status = None;
        filter
    }

    fn build(visibility: Visibility, scope: Scope, query: &ProjectQuery) -> Self {
        let search = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        Self {
            visibility,
            scope,
            category: query.category,
            min_price: query.min_price,
            max_price: query.max_price,
            search,
            status: query.status,
            owner: query.owner.clone(),
            sort_by: query.sort_by.unwrap_or_default(),
            order: query.order.unwrap_or_default(),
            page: query.page.unwrap_or(1).max(1),
            limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn matches(&self, project: &Project) -> bool {
        if !self.visibility.permits(project) {
            return false;
        }
        if self.scope == Scope::ForSale && !project.is_purchasable() {
            return false;
        }
        if self.category.is_some_and(|c| c != project.category) {
            return false;
        }
        if self.min_price.is_some_and(|min| project.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| project.price > max) {
            return false;
        }
        if self.status.is_some_and(|s| s != project.status) {
            return false;
        }
        if self.owner.as_ref().is_some_and(|o| o != &project.owner) {
            return false;
        }
        match &self.search {
            Some(needle) => {
                project.title.to_lowercase().contains(needle)
                    || project.description.to_lowercase().contains(needle)
            }
            None => true,
        }
    }

    fn compare(&self, a: &Project, b: &Project) -> Ordering {
        let ord = match self.sort_by {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::Price => a.price.cmp(&b.price),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        }
        // stable tie-break so pages never overlap
        .then_with(|| a.id.cmp(&b.id));

        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }

    /// Sorts and slices already matched projects into the requested page.
    pub fn paginate(&self, mut items: Vec<Project>) -> Page<Project> {
        items.sort_by(|a, b| self.compare(a, b));
        let total = items.len();
        let total_pages = total.div_ceil(self.limit);
        let items = items
            .into_iter()
            .skip((self.page - 1).saturating_mul(self.limit))
            .take(self.limit)
            .collect();

        Page {
            items,
            page: self.page,
            limit: self.limit,
            total,
            total_pages,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Role;
    use crate::project::ProjectDraft;

    fn project(owner: &str, title: &str, price: u64, status: ProjectStatus) -> Project {
        let draft = ProjectDraft::new()
            .set_title(title)
            .set_description("description")
            .set_category(Category::Game)
            .set_price(price)
            .set_delivery_days(3)
            .validate()
            .unwrap();
        let mut p = Project::from_draft(format!("project_{title}"), owner.into(), draft);
        p.status = status;
        p
    }

    #[test]
    fn visibility_table() {
        let mine = project("alice", "a", 10, ProjectStatus::Draft);
        let approved = project("bob", "b", 10, ProjectStatus::Approved);
        let others = project("bob", "c", 10, ProjectStatus::Submitted);

        let public = Visibility::for_caller(None);
        assert!(!public.permits(&mine));
        assert!(public.permits(&approved));

        let alice = Caller::new("alice", Role::Seller);
        let member = Visibility::for_caller(Some(&alice));
        assert!(member.permits(&mine));
        assert!(member.permits(&approved));
        assert!(!member.permits(&others));

        let admin = Caller::new("root", Role::Admin);
        let all = Visibility::for_caller(Some(&admin));
        assert!(all.permits(&mine) && all.permits(&others));
    }

    #[test]
    fn marketplace_filter_only_admits_purchasable_projects() {
        let mut listed = project("bob", "listed", 10, ProjectStatus::Approved);
        listed.is_for_sale = true;
        let unlisted = project("bob", "unlisted", 10, ProjectStatus::Approved);

        let filter = ProjectFilter::for_marketplace(&ProjectQuery::default());
        assert!(filter.matches(&listed));
        assert!(!filter.matches(&unlisted));
    }

    #[test]
    fn price_range_category_and_search() {
        let p = project("bob", "Rusty Game", 500, ProjectStatus::Approved);
        let query = ProjectQuery {
            min_price: Some(100),
            max_price: Some(600),
            category: Some(Category::Game),
            search: Some("  rusty ".into()),
            ..Default::default()
        };
        assert!(ProjectFilter::for_projects(None, &query).matches(&p));

        let too_cheap = ProjectQuery {
            max_price: Some(499),
            ..Default::default()
        };
        assert!(!ProjectFilter::for_projects(None, &too_cheap).matches(&p));
    }

    #[test]
    fn paginate_sorts_and_slices() {
        let items: Vec<_> = [30, 10, 20, 50, 40]
            .iter()
            .map(|price| project("bob", &format!("t{price}"), *price, ProjectStatus::Approved))
            .collect();
        let query = ProjectQuery {
            page: Some(2),
            limit: Some(2),
            sort_by: Some(SortField::Price),
            order: Some(SortOrder::Asc),
            ..Default::default()
        };
        let page = ProjectFilter::for_projects(None, &query).paginate(items);
        let prices: Vec<_> = page.items.iter().map(|p| p.price).collect();
        assert_eq!(prices, [30, 40]);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn page_far_past_the_end_is_empty() {
        let items = vec![project("bob", "only", 10, ProjectStatus::Approved)];
        let query = ProjectQuery {
            page: Some(usize::MAX),
            limit: Some(MAX_PAGE_SIZE),
            ..Default::default()
        };
        assert!(query.validate().is_ok());
        let page = ProjectFilter::for_projects(None, &query).paginate(items);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 1);
        assert_eq!(page.page, usize::MAX);
    }

    #[test]
    fn inverted_price_range_is_invalid() {
        let query = ProjectQuery {
            min_price: Some(10),
            max_price: Some(5),
            ..Default::default()
        };
        assert!(query.validate().is_err());
    }
}
