use crate::db::Database;
use crate::models::Message;
use crate::rules::{Action, ActionKind};
use crate::source::MessageSource;
use tracing::{debug, error, warn};

const INBOX: &str = "INBOX";
const UNREAD: &str = "UNREAD";

/// Applies rule actions to messages, remotely first and then in the store.
///
/// Every action means "ensure this state": when the message already has it
/// the dispatcher reports success without touching the source.
pub struct ActionDispatcher<S> {
    source: S,
    db: Database,
}

impl<S: MessageSource> ActionDispatcher<S> {
    pub fn new(source: S, db: Database) -> Self {
        Self { source, db }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns whether the message is now in the state the action asks for.
    /// `message` is updated to match.
    pub async fn apply(&self, message: &mut Message, action: &Action) -> bool {
        match &action.kind {
            ActionKind::MarkAsRead => self.set_read(message, true).await,
            ActionKind::MarkAsUnread => self.set_read(message, false).await,
            ActionKind::MoveMessage => match action.value.as_deref() {
                Some(label) if !label.trim().is_empty() => self.move_to(message, label).await,
                _ => {
                    warn!(message_id = %message.id, "move_message without a target label");
                    false
                }
            },
            ActionKind::Unknown(kind) => {
                warn!(message_id = %message.id, action = %kind, "Unknown action type");
                false
            }
        }
    }

    async fn set_read(&self, message: &mut Message, read: bool) -> bool {
        if message.is_read == read {
            debug!(message_id = %message.id, read, "Read state already set");
            return true;
        }

        if let Err(e) = self.source.set_read_state(&message.id, read).await {
            error!("Failed to set read state of {}: {}", message.id, e);
            return false;
        }

        message.is_read = read;
        if read {
            message.labels.retain(|l| l != UNREAD);
        } else if !message.has_label(UNREAD) {
            message.labels.push(UNREAD.to_string());
        }

        let mirrored = match self.db.mark_message_as_read(&message.id, read).await {
            Ok(()) if read => self.db.remove_label_from_message(&message.id, UNREAD).await,
            Ok(()) => self.db.add_label_to_message(&message.id, UNREAD).await,
            Err(e) => Err(e),
        };
        if let Err(e) = mirrored {
            error!("Read state of {} changed remotely but not stored: {}", message.id, e);
        }
        true
    }

    async fn move_to(&self, message: &mut Message, label: &str) -> bool {
        let target = match self.db.find_label_id(label).await {
            Ok(Some(id)) => id,
            Ok(None) => label.to_string(),
            Err(e) => {
                warn!("Could not resolve label '{}': {}", label, e);
                label.to_string()
            }
        };
        if message.has_label(&target) || message.has_label(label) {
            debug!(message_id = %message.id, label, "Already in target label");
            return true;
        }

        let added = match self.source.add_label(&message.id, label).await {
            Ok(added) => added,
            Err(e) => {
                error!("Failed to move {} to '{}': {}", message.id, label, e);
                return false;
            }
        };
        // Later rules resolve the same name to this id.
        if let Err(e) = self.db.upsert_labels(std::slice::from_ref(&added)).await {
            error!("Label '{}' ({}) not stored: {}", added.name, added.id, e);
        }
        let label_id = added.id;
        if !message.has_label(&label_id) {
            message.labels.push(label_id.clone());
        }
        if let Err(e) = self.db.add_label_to_message(&message.id, &label_id).await {
            error!("Label '{}' added to {} but not stored: {}", label_id, message.id, e);
        }

        if label_id != INBOX && message.has_label(INBOX) {
            match self.source.remove_label(&message.id, INBOX).await {
                Ok(()) => {
                    message.labels.retain(|l| l != INBOX);
                    if let Err(e) = self.db.remove_label_from_message(&message.id, INBOX).await {
                        error!("{} left the inbox but the store still lists it: {}", message.id, e);
                    }
                }
                Err(e) => warn!("{} labelled '{}' but still in inbox: {}", message.id, label_id, e),
            }
        }
        true
    }
}
