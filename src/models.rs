use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub label_type: String, // 'system' or 'user'
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub snippet: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub subject: Option<String>,
    /// Milliseconds since the epoch, UTC.
    pub internal_date: i64,
    pub body_plain: Option<String>,
    pub is_read: bool,
    pub labels: Vec<String>,
    /// The source's own representation of the message, as JSON.
    pub raw_data: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn received_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.internal_date).unwrap_or_default()
    }

    pub fn has_label(&self, label_id: &str) -> bool {
        self.labels.iter().any(|l| l == label_id)
    }
}

/// Action type name -> value applied, e.g. `{"move_message": "Receipts"}`.
pub type ActionsTaken = BTreeMap<String, Option<String>>;

/// A rule execution waiting to be committed at the end of a rule's pass.
#[derive(Debug, Clone)]
pub struct PendingExecution {
    pub message_id: String,
    pub rule_id: String,
    pub actions_taken: ActionsTaken,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub message_id: String,
    pub rule_id: String,
    pub executed_at: DateTime<Utc>,
    pub actions_taken: ActionsTaken,
}

/// Plain column filters for browsing the store. Text filters are
/// case-insensitive substring matches.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub from_contains: Option<String>,
    pub subject_contains: Option<String>,
    pub is_read: Option<bool>,
    pub label_id: Option<String>,
}
