use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Canonical cached record. `id` is the decimal UID of the message in whichever
/// folder it was last seen in, so it is rewritten when the message changes folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub unread: bool,
    pub trashed: bool,
    pub raw: Option<Vec<u8>>,
    /// Set when a copy succeeded remotely but the new UID could not be resolved.
    pub reconcile_pending: bool,
}

impl StoredMessage {
    pub fn to_preview(&self) -> MessagePreview {
        MessagePreview {
            id: self.id.clone(),
            sender: self.sender.clone(),
            subject: self.subject.clone(),
            received_at: self.received_at,
            unread: self.unread,
        }
    }

    pub fn has_raw(&self) -> bool {
        self.raw.as_ref().is_some_and(|raw| !raw.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessagePreview {
    pub id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub unread: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageDetail {
    pub id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: Option<DateTime<Utc>>,
    pub unread: bool,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

/// Result of a trash/restore. `effective_id` is the id the caller should use from
/// now on; it differs from the requested id when the remote UID was rebound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub success: bool,
    pub effective_id: String,
}

impl MoveOutcome {
    pub fn succeeded(effective_id: impl Into<String>) -> Self {
        Self {
            success: true,
            effective_id: effective_id.into(),
        }
    }

    pub fn failed(effective_id: impl Into<String>) -> Self {
        Self {
            success: false,
            effective_id: effective_id.into(),
        }
    }
}

/// Newest first, messages without a timestamp last.
pub fn newest_first(a: &Option<DateTime<Utc>>, b: &Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
