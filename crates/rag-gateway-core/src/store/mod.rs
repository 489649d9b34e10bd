//! Document store abstraction for RAG Gateway.
//!
//! The [`DocumentStore`] trait is the capability surface the gateway needs
//! from its search engine: a liveness probe, lexical search and durable
//! writes. Ranking is the store's business; callers receive documents in
//! the order the store returns them.
//!
//! Implementations must be `Send + Sync` to be shared across requests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Document;

/// Abstract search/archive backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ping`](DocumentStore::ping) | Cheap liveness probe |
/// | [`ensure_index`](DocumentStore::ensure_index) | Create the index when missing |
/// | [`search`](DocumentStore::search) | Fuzzy lexical OR-match over content |
/// | [`save`](DocumentStore::save) | Write a document and wait until it is searchable |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `true` when the store answers. Never errors.
    async fn ping(&self) -> bool;

    /// Create the backing index if it does not exist yet.
    async fn ensure_index(&self) -> Result<()>;

    /// Up to `limit` documents matching any term of `query`, most relevant first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>>;

    /// Persist `doc`. Returns the store-assigned id once the write is
    /// visible to subsequent searches.
    async fn save(&self, doc: &Document) -> Result<String>;
}
