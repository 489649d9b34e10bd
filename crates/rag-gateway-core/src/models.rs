//! Core data models used throughout RAG Gateway.
//!
//! These types represent the documents, generation requests and canonical
//! results that flow through the augmentation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document as returned by the document store.
///
/// Identity is assigned by the store and never surfaced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Document {
    /// Build a document stamped with the current time.
    ///
    /// A non-object `metadata` value is replaced by an empty object so the
    /// stored shape always matches the index mapping.
    pub fn new(content: impl Into<String>, metadata: Value) -> Self {
        let metadata = if metadata.is_object() {
            metadata
        } else {
            empty_object()
        };
        Self {
            content: content.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }
}

/// A single chat message. Unknown fields are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            extra: Map::new(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// What the model is asked: a bare prompt or a conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Prompt(String),
    Messages(Vec<ChatMessage>),
}

impl Payload {
    /// The text retrieval should search for.
    ///
    /// For prompts this is the prompt itself; for conversations it is the
    /// content of the last `user` message.
    pub fn query_text(&self) -> Option<&str> {
        match self {
            Payload::Prompt(p) => Some(p.as_str()),
            Payload::Messages(msgs) => msgs
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.as_str()),
        }
    }
}

/// Canonical generation request, independent of the upstream API shape.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub payload: Payload,
    pub model: String,
    pub system: Option<String>,
    /// Opaque model options, forwarded as-is.
    pub options: Option<Value>,
    pub stream: bool,
    pub temperature: Option<f64>,
}

/// Canonical generation result, independent of the upstream API shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Augmentation report attached to every non-streamed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagInfo {
    pub enhanced: bool,
    pub docs_count: usize,
}

impl RagInfo {
    pub fn from_docs(docs: &[Document]) -> Self {
        Self {
            enhanced: !docs.is_empty(),
            docs_count: docs.len(),
        }
    }
}
