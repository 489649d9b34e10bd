//! In-memory [`DocumentStore`] implementation for tests and embedding.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Search lowercases and splits
//! on non-alphanumerics, then counts how many query terms match some
//! document term within an edit distance that grows with term length
//! (0 edits up to 2 chars, 1 up to 5, 2 beyond). Writes are visible
//! immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Document;

use super::DocumentStore;

struct StoredDoc {
    _id: String,
    doc: Document,
}

/// In-memory store. Can be switched off to simulate an unreachable engine.
pub struct InMemoryStore {
    docs: RwLock<Vec<StoredDoc>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("document store unavailable");
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn max_edits(term: &str) -> usize {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn fuzzy_match(query_term: &str, doc_term: &str) -> bool {
    let allowed = max_edits(query_term);
    if allowed == 0 {
        return query_term == doc_term;
    }
    let (lq, ld) = (query_term.chars().count(), doc_term.chars().count());
    if lq.abs_diff(ld) > allowed {
        return false;
    }
    edit_distance(query_term, doc_term) <= allowed
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ping(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn ensure_index(&self) -> Result<()> {
        self.check_available()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
        self.check_available()?;
        let query_terms = terms(query);
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow::anyhow!("document store lock poisoned"))?;
        let mut scored: Vec<(usize, &Document)> = docs
            .iter()
            .filter_map(|sd| {
                let doc_terms = terms(&sd.doc.content);
                let score = query_terms
                    .iter()
                    .filter(|q| doc_terms.iter().any(|d| fuzzy_match(q, d)))
                    .count();
                (score > 0).then_some((score, &sd.doc))
            })
            .collect();
        // Stable: ties keep insertion order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn save(&self, doc: &Document) -> Result<String> {
        self.check_available()?;
        let id = uuid::Uuid::new_v4().to_string();
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow::anyhow!("document store lock poisoned"))?;
        docs.push(StoredDoc {
            _id: id.clone(),
            doc: doc.clone(),
        });
        Ok(id)
    }
}
