//! Recipient-addressed notifications raised by lifecycle and sale events
use super::account::Caller;
use super::error::{MarketError, MarketResult};
use super::store::{NOTIFICATIONS, Record, Store};
use super::types::TimeStamp;
use super::utils;
use chrono::Utc;
use serde::Serialize;

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    #[n(0)]
    ProjectApproved,
    #[n(1)]
    ProjectRejected,
    #[n(2)]
    ProjectSold,
    #[n(3)]
    PurchaseConfirmed,
    #[n(4)]
    PaymentFailed,
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub recipient: String,
    #[n(2)]
    pub kind: NotificationKind,
    #[n(3)]
    pub message: String,
    #[n(4)]
    pub subject: Option<String>, // project or order the event is about
    #[n(5)]
    pub read: bool,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

impl Record for Notification {
    const TREE: &'static str = NOTIFICATIONS;
    const ENTITY: &'static str = "notification";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Notification {
    pub fn new(recipient: String, kind: NotificationKind, message: String) -> MarketResult<Self> {
        Ok(Self {
            id: utils::new_uuid_to_bech32("note_")?,
            recipient,
            kind,
            message,
            subject: None,
            read: false,
            created_at: TimeStamp::new(),
        })
    }
    pub fn about(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }
}

#[derive(Clone)]
pub struct NotificationService {
    store: Store,
}

impl NotificationService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records a notification. Delivery is best effort: a failure here is
    /// logged and never fails the operation that raised it.
    pub(crate) fn notify(&self, recipient: &str, kind: NotificationKind, subject: &str, message: String) {
        let stored = Notification::new(recipient.to_string(), kind, message)
            .map(|n| n.about(subject))
            .and_then(|n| self.store.create(&n));
        if let Err(err) = stored {
            tracing::warn!(recipient, ?kind, subject, error = %err, "failed to record notification");
        }
    }

    pub fn list(&self, caller: &Caller, unread_only: bool) -> MarketResult<Vec<Notification>> {
        let mut notes = self.store.scan::<Notification, _>(|n| {
            n.recipient == caller.user_id && (!unread_only || !n.read)
        })?;
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notes)
    }

    pub fn mark_read(&self, caller: &Caller, id: &str) -> MarketResult<Notification> {
        self.store.update_with::<Notification, _>(id, |mut note| {
            if note.recipient != caller.user_id {
                return Err(MarketError::Forbidden(
                    "Notification belongs to another user".into(),
                ));
            }
            note.read = true;
            Ok(note)
        })
    }

    /// Marks every unread notification of the caller as read; returns how many changed.
    pub fn mark_all_read(&self, caller: &Caller) -> MarketResult<usize> {
        let unread = self.list(caller, true)?;
        for note in &unread {
            self.mark_read(caller, &note.id)?;
        }
        Ok(unread.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Role;

    #[test]
    fn recipients_only_see_and_mark_their_own() {
        let service = NotificationService::new(Store::temporary().unwrap());
        service.notify("alice", NotificationKind::ProjectApproved, "project_1", "approved".into());
        service.notify("bob", NotificationKind::ProjectSold, "project_2", "sold".into());

        let alice = Caller::new("alice", Role::Seller);
        let bob = Caller::new("bob", Role::Seller);
        let notes = service.list(&alice, false).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].subject.as_deref(), Some("project_1"));

        assert!(matches!(
            service.mark_read(&bob, &notes[0].id),
            Err(MarketError::Forbidden(_))
        ));
        assert_eq!(service.mark_all_read(&alice).unwrap(), 1);
        assert!(service.list(&alice, true).unwrap().is_empty());
    }
}
