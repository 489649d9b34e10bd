//! Retrieval of prior documents for augmentation.
//!
//! [`Retriever::fetch`] never fails: a blank query, an unreachable store
//! or a search error all yield an empty result, which the pipeline reads
//! as "do not augment".

use std::sync::Arc;

use tracing::{debug, warn};

use rag_gateway_core::models::Document;
use rag_gateway_core::store::DocumentStore;

pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    default_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn DocumentStore>, default_k: usize) -> Self {
        Self { store, default_k }
    }

    /// Up to `k` documents relevant to `query`, in store relevance order.
    pub async fn fetch(&self, query: &str, k: usize) -> Vec<Document> {
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }

        if !self.store.ping().await {
            warn!("document store unreachable, skipping retrieval");
            return Vec::new();
        }

        match self.store.search(query, k).await {
            Ok(mut docs) => {
                docs.truncate(k);
                debug!(hits = docs.len(), k, "retrieved documents");
                docs
            }
            Err(e) => {
                warn!(error = %e, "document search failed, continuing without context");
                Vec::new()
            }
        }
    }

    /// [`fetch`](Self::fetch) with the configured K.
    pub async fn fetch_default(&self, query: &str) -> Vec<Document> {
        self.fetch(query, self.default_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use rag_gateway_core::store::memory::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts every call that reaches the store.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for CountingStore {
        async fn ping(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.ping().await
        }
        async fn ensure_index(&self) -> Result<()> {
            self.inner.ensure_index().await
        }
        async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.search(query, limit).await
        }
        async fn save(&self, doc: &Document) -> Result<String> {
            self.inner.save(doc).await
        }
    }

    #[tokio::test]
    async fn test_blank_query_does_not_touch_store() {
        let store = Arc::new(CountingStore::default());
        let retriever = Retriever::new(store.clone(), 3);

        assert!(retriever.fetch("", 3).await.is_empty());
        assert!(retriever.fetch("   ", 3).await.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_empty() {
        let store = Arc::new(InMemoryStore::new());
        store.save(&Document::new("hello world", json!({}))).await.unwrap();
        store.set_available(false);

        let retriever = Retriever::new(store, 3);
        assert!(retriever.fetch("hello", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_caps_at_k() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..6 {
            store
                .save(&Document::new(format!("deploy step {}", i), json!({})))
                .await
                .unwrap();
        }
        let retriever = Retriever::new(store, 3);
        assert_eq!(retriever.fetch_default("deploy").await.len(), 3);
        assert_eq!(retriever.fetch("deploy", 5).await.len(), 5);
    }
}
