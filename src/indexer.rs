//! Best-effort persistence of generated answers and uploaded documents.
//!
//! Every failure is logged and folded into the returned outcome; nothing
//! here returns an error. The request pipeline uses
//! [`Indexer::persist_detached`] and never looks at the result; the
//! ingestion route awaits [`Indexer::persist_outcome`] and relies on the
//! store's write-visibility acknowledgement.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use rag_gateway_core::models::Document;
use rag_gateway_core::store::DocumentStore;

/// Result of one persistence attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written and visible; carries the store-assigned id.
    Saved(String),
    /// Blank text, nothing to write.
    Skipped,
    /// The liveness probe failed before writing.
    StoreUnavailable,
    /// The write itself failed.
    Failed(String),
}

impl PersistOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, PersistOutcome::Saved(_))
    }
}

pub struct Indexer {
    store: Arc<dyn DocumentStore>,
    max_chars: usize,
}

impl Indexer {
    pub fn new(store: Arc<dyn DocumentStore>, max_chars: usize) -> Self {
        Self { store, max_chars }
    }

    /// Persist `text` with `metadata`; `true` only when the write landed.
    pub async fn persist(&self, text: &str, metadata: Value) -> bool {
        self.persist_outcome(text, metadata).await.is_saved()
    }

    pub async fn persist_outcome(&self, text: &str, metadata: Value) -> PersistOutcome {
        if text.trim().is_empty() {
            debug!("skipping persistence of empty content");
            return PersistOutcome::Skipped;
        }

        if !self.store.ping().await {
            warn!("document store unreachable, response not archived");
            return PersistOutcome::StoreUnavailable;
        }

        let doc = Document::new(truncate_chars(text, self.max_chars), metadata);
        match self.store.save(&doc).await {
            Ok(id) => {
                debug!(id = %id, chars = doc.content.chars().count(), "document archived");
                PersistOutcome::Saved(id)
            }
            Err(e) => {
                error!(error = %e, "failed to archive document");
                PersistOutcome::Failed(e.to_string())
            }
        }
    }

    /// Fire-and-forget [`persist`](Self::persist) on a detached task.
    pub fn persist_detached(self: &Arc<Self>, text: String, metadata: Value) -> JoinHandle<bool> {
        let indexer = Arc::clone(self);
        tokio::spawn(async move { indexer.persist(&text, metadata).await })
    }
}

/// First `max` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
