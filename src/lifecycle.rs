//! Project lifecycle engine.
//!
//! ```text
//! draft ──submit──▶ submitted ──approve──▶ approved
//!   ▲                  │
//!   └──edit── rejected ◀┘ reject(reason)
//! ```
//!
//! Every transition runs as a conditional update against the stored record,
//! so the status check and the write are one atomic step.
use super::account::{Caller, require_admin};
use super::error::{FieldError, MarketError, MarketResult};
use super::notification::{NotificationKind, NotificationService};
use super::project::{Project, ProjectDraft, ProjectStatus};
use super::store::Store;
use super::types::{Currency, TimeStamp};
use super::utils;
use super::visibility::{Page, ProjectFilter, ProjectQuery, Visibility};

pub const EDITABLE: [&str; 2] = ["draft", "rejected"];
pub const SUBMITTABLE: [&str; 2] = ["draft", "rejected"];
pub const REVIEWABLE: [&str; 1] = ["submitted"];
pub const MAX_REASON_LEN: usize = 1_000;

pub struct ProjectService {
    store: Store,
    notifications: NotificationService,
    default_currency: Currency,
}

impl ProjectService {
    pub fn new(store: Store, notifications: NotificationService) -> Self {
        Self {
            store,
            notifications,
            default_currency: Currency::default(),
        }
    }

    /// Currency for drafts that do not name one.
    pub fn with_default_currency(mut self, currency: Currency) -> Self {
        self.default_currency = currency;
        self
    }

    fn priced(&self, mut draft: ProjectDraft) -> ProjectDraft {
        draft.currency.get_or_insert(self.default_currency);
        draft
    }

    /// Create a new project in `draft`, owned by the caller
    pub fn create(&self, caller: &Caller, draft: ProjectDraft) -> MarketResult<Project> {
        let valid = self.priced(draft).validate()?;
        let project = Project::from_draft(
            utils::new_uuid_to_bech32("project_")?,
            caller.user_id.clone(),
            valid,
        );
        self.store.create(&project)?;

        tracing::info!(project_id = %project.id, owner = %project.owner, "project created");
        Ok(project)
    }

    /// Edit a draft or rejected project. Editing a rejected project sends it
    /// back to draft and clears the rejection reason.
    pub fn edit(&self, caller: &Caller, project_id: &str, draft: ProjectDraft) -> MarketResult<Project> {
        let valid = self.priced(draft).validate()?;

        let project = self.store.update_with::<Project, _>(project_id, |mut project| {
            require_owner(caller, &project, "edit")?;
            match project.status {
                ProjectStatus::Draft | ProjectStatus::Rejected => {}
                other => return Err(MarketError::invalid_transition("edit", other, &EDITABLE)),
            }

            project.apply_draft(valid.clone());
            project.status = ProjectStatus::Draft;
            project.rejection_reason = None;
            Ok(project)
        })?;

        tracing::info!(project_id, "project edited");
        Ok(project)
    }

    /// Submit a project for administrative review
    pub fn submit(&self, caller: &Caller, project_id: &str) -> MarketResult<Project> {
        let project = self.store.update_with::<Project, _>(project_id, |mut project| {
            require_owner(caller, &project, "submit")?;
            match project.status {
                ProjectStatus::Draft | ProjectStatus::Rejected => {}
                other => {
                    return Err(MarketError::invalid_transition("submit", other, &SUBMITTABLE));
                }
            }

            let now = TimeStamp::new();
            project.status = ProjectStatus::Submitted;
            project.submission_date = Some(now.clone());
            project.rejection_reason = None;
            project.updated_at = now;
            Ok(project)
        })?;

        tracing::info!(project_id, "project submitted for review");
        Ok(project)
    }

    /// Approve a submitted project
    pub fn approve(&self, caller: &Caller, project_id: &str) -> MarketResult<Project> {
        require_admin(caller)?;

        let project = self.store.update_with::<Project, _>(project_id, |mut project| {
            if project.status != ProjectStatus::Submitted {
                return Err(MarketError::invalid_transition(
                    "approve",
                    project.status,
                    &REVIEWABLE,
                ));
            }

            let now = TimeStamp::new();
            project.status = ProjectStatus::Approved;
            project.reviewed_by = Some(caller.user_id.clone());
            project.reviewed_at = Some(now.clone());
            project.rejection_reason = None;
            project.updated_at = now;
            Ok(project)
        })?;

        tracing::info!(project_id, reviewer = %caller.user_id, "project approved");
        self.notifications.notify(
            &project.owner,
            NotificationKind::ProjectApproved,
            &project.id,
            format!("Your project \"{}\" was approved", project.title),
        );
        Ok(project)
    }

    /// Reject a submitted project with a non-empty reason
    pub fn reject(&self, caller: &Caller, project_id: &str, reason: &str) -> MarketResult<Project> {
        require_admin(caller)?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(MarketError::validation(vec![FieldError::new(
                "reason",
                "A rejection reason is required",
            )]));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(MarketError::validation(vec![FieldError::new(
                "reason",
                format!("Reason must be at most {MAX_REASON_LEN} characters"),
            )]));
        }

        let project = self.store.update_with::<Project, _>(project_id, |mut project| {
            if project.status != ProjectStatus::Submitted {
                return Err(MarketError::invalid_transition(
                    "reject",
                    project.status,
                    &REVIEWABLE,
                ));
            }

            let now = TimeStamp::new();
            project.status = ProjectStatus::Rejected;
            project.reviewed_by = Some(caller.user_id.clone());
            project.reviewed_at = Some(now.clone());
            project.rejection_reason = Some(reason.to_string());
            project.updated_at = now;
            Ok(project)
        })?;

        tracing::info!(project_id, reviewer = %caller.user_id, "project rejected");
        self.notifications.notify(
            &project.owner,
            NotificationKind::ProjectRejected,
            &project.id,
            format!("Your project \"{}\" was rejected: {reason}", project.title),
        );
        Ok(project)
    }

    /// Delete a project. Admins may delete anything; owners may not delete a
    /// project that is under review or already sold.
    pub fn delete(&self, caller: &Caller, project_id: &str) -> MarketResult<Project> {
        let project = self.store.remove_if::<Project, _>(project_id, |project| {
            if caller.is_admin() {
                return Ok(());
            }
            require_owner(caller, project, "delete")?;
            if project.is_sold() {
                return Err(MarketError::Conflict(
                    "cannot delete a project that has been sold".into(),
                ));
            }
            if project.status == ProjectStatus::Submitted {
                return Err(MarketError::invalid_transition(
                    "delete",
                    project.status,
                    &["draft", "approved", "rejected"],
                ));
            }
            Ok(())
        })?;

        tracing::info!(project_id, by = %caller.user_id, "project deleted");
        Ok(project)
    }

    /// Single project fetch under the read visibility policy. Projects the
    /// caller may not see are reported as missing.
    pub fn get(&self, caller: Option<&Caller>, project_id: &str) -> MarketResult<Project> {
        let project = self.store.fetch::<Project>(project_id)?;
        if Visibility::for_caller(caller).permits(&project) {
            Ok(project)
        } else {
            Err(MarketError::not_found("project", project_id))
        }
    }

    pub fn list(&self, caller: Option<&Caller>, query: &ProjectQuery) -> MarketResult<Page<Project>> {
        query.validate()?;
        let filter = ProjectFilter::for_projects(caller, query);
        let matched = self.store.scan::<Project, _>(|p| filter.matches(p))?;
        Ok(filter.paginate(matched))
    }
}

pub(crate) fn require_owner(caller: &Caller, project: &Project, action: &str) -> MarketResult<()> {
    if caller.is(&project.owner) {
        Ok(())
    } else {
        Err(MarketError::Forbidden(format!(
            "only the project owner may {action} this project"
        )))
    }
}
