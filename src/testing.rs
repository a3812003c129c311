//! Fixtures shared by the unit tests.

use crate::error::SourceError;
use crate::models::{Label, Message};
use crate::source::MessageSource;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub fn message(id: &str, from: &str, subject: &str) -> Message {
    Message {
        id: id.to_string(),
        thread_id: format!("t-{}", id),
        from_address: Some(from.to_string()),
        to_address: Some("me@example.com".to_string()),
        subject: Some(subject.to_string()),
        body_plain: Some(String::new()),
        internal_date: Utc::now().timestamp_millis(),
        is_read: false,
        labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetRead(String, bool),
    AddLabel(String, String),
    RemoveLabel(String, String),
}

/// An in-memory mailbox that records every state-changing call.
#[derive(Default)]
pub struct FakeSource {
    pub messages: Vec<Message>,
    pub labels: Vec<Label>,
    pub calls: Mutex<Vec<Call>>,
    /// Message ids whose mutations fail.
    pub failing: HashSet<String>,
    /// Label name -> id handed back by `add_label`. Unlisted names are
    /// their own id, like Gmail's system labels.
    pub label_ids: HashMap<String, String>,
}

impl FakeSource {
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, id: &str, call: Call) -> Result<(), SourceError> {
        if self.failing.contains(id) {
            return Err(SourceError::remote("modify", id, "simulated outage"));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn list(&self, _query: &str, max_results: u32) -> Result<Vec<String>, SourceError> {
        Ok(self
            .messages
            .iter()
            .take(max_results as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Message, SourceError> {
        if self.failing.contains(id) {
            return Err(SourceError::remote("get", id, "simulated outage"));
        }
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| SourceError::remote("get", id, "no such message"))
    }

    async fn list_labels(&self) -> Result<Vec<Label>, SourceError> {
        Ok(self.labels.clone())
    }

    async fn set_read_state(&self, id: &str, read: bool) -> Result<(), SourceError> {
        self.record(id, Call::SetRead(id.to_string(), read))
    }

    async fn add_label(&self, id: &str, label: &str) -> Result<Label, SourceError> {
        self.record(id, Call::AddLabel(id.to_string(), label.to_string()))?;
        Ok(Label {
            id: self
                .label_ids
                .get(label)
                .cloned()
                .unwrap_or_else(|| label.to_string()),
            name: label.to_string(),
            label_type: "user".to_string(),
        })
    }

    async fn remove_label(&self, id: &str, label: &str) -> Result<(), SourceError> {
        self.record(id, Call::RemoveLabel(id.to_string(), label.to_string()))
    }
}
