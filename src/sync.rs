use crate::db::Database;
use crate::error::StoreResult;
use crate::source::MessageSource;
use tracing::{debug, error, info, warn};

/// Messages are written to the store in chunks of this size, one
/// transaction each.
const UPSERT_BATCH: usize = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
}

/// Pulls the label catalogue and up to `max_results` messages matching
/// `query` into the store.
///
/// A message that cannot be fetched is skipped; a failed listing ends the
/// sync with whatever has been stored so far.
pub async fn sync_messages<S: MessageSource>(
    source: &S,
    db: &Database,
    query: &str,
    max_results: u32,
) -> StoreResult<SyncSummary> {
    let mut summary = SyncSummary::default();

    match source.list_labels().await {
        Ok(labels) => {
            db.upsert_labels(&labels).await?;
            debug!("Refreshed {} labels", labels.len());
        }
        Err(e) => warn!("Failed to refresh labels: {}", e),
    }

    let ids = match source.list(query, max_results).await {
        Ok(ids) => ids,
        Err(e) => {
            error!("Failed to list messages: {}", e);
            return Ok(summary);
        }
    };

    for chunk in ids.chunks(UPSERT_BATCH) {
        let known = db.existing_message_ids(chunk).await?;

        let mut messages = Vec::with_capacity(chunk.len());
        for id in chunk {
            match source.get(id).await {
                Ok(msg) => messages.push(msg),
                Err(e) => error!("Failed to fetch message {}: {}", id, e),
            }
        }

        db.upsert_messages(&messages).await?;
        for msg in &messages {
            if known.contains(&msg.id) {
                summary.updated += 1;
            } else {
                summary.new += 1;
            }
        }
        summary.fetched += messages.len();
    }

    info!(
        "Synced {} messages ({} new, {} updated)",
        summary.fetched, summary.new, summary.updated
    );
    Ok(summary)
}
