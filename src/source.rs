use crate::error::SourceError;
use crate::models::{Label, Message};
use async_trait::async_trait;

/// The remote mailbox the engine reads from and acts on.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Ids of messages matching `query`, newest first, at most `max_results`.
    async fn list(&self, query: &str, max_results: u32) -> Result<Vec<String>, SourceError>;

    async fn get(&self, id: &str) -> Result<Message, SourceError>;

    async fn list_labels(&self) -> Result<Vec<Label>, SourceError>;

    async fn set_read_state(&self, id: &str, read: bool) -> Result<(), SourceError>;

    /// Adds the label named (or identified by) `label` to a message, creating
    /// the label first if the mailbox has none by that name. Returns the
    /// label as the mailbox knows it.
    async fn add_label(&self, id: &str, label: &str) -> Result<Label, SourceError>;

    async fn remove_label(&self, id: &str, label: &str) -> Result<(), SourceError>;
}
