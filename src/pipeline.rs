//! The request pipeline: retrieve → inject → call → normalize → archive.
//!
//! [`Gateway`] owns one of each component and wires them in the order the
//! augmented payload depends on. Retrieval always finishes (or degrades)
//! before injection, and injection before the upstream call. Archiving is
//! spawned and not awaited, so a client can receive its answer before the
//! store has it.
//!
//! ```text
//! request ─▶ Retriever ─▶ ContextInjector ─▶ UpstreamAdapter ─┬─▶ stream relay
//!                                                            └─▶ normalize ─▶ reply
//!                                                                     └─▶ Indexer (detached)
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use rag_gateway_core::endpoint::{Endpoint, NegotiatedEndpoint};
use rag_gateway_core::inject::ContextInjector;
use rag_gateway_core::models::{
    ChatMessage, Document, GenerationRequest, GenerationResult, Payload, RagInfo,
};
use rag_gateway_core::normalize::to_canonical;
use rag_gateway_core::store::DocumentStore;

use crate::config::Config;
use crate::elastic::ElasticsearchStore;
use crate::error::{GatewayError, GatewayResult};
use crate::indexer::{Indexer, PersistOutcome};
use crate::probe::CapabilityProber;
use crate::retrieval::Retriever;
use crate::upstream::{UpstreamAdapter, UpstreamError, UpstreamResponse};

/// Generation request as sent by a client, before defaults and validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Outcome of one pipeline run.
#[derive(Debug)]
pub enum GatewayReply {
    Complete {
        endpoint: Endpoint,
        /// Backend payload, untouched.
        raw: Value,
        result: GenerationResult,
        rag: RagInfo,
        model: String,
    },
    Stream {
        response: reqwest::Response,
        rag: RagInfo,
    },
}

/// Liveness of both dependencies plus the adaptation state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub gateway: &'static str,
    pub version: &'static str,
    pub endpoint: Endpoint,
    pub backend: bool,
    pub store: bool,
}

pub struct Gateway {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    retriever: Retriever,
    injector: ContextInjector,
    upstream: Arc<UpstreamAdapter>,
    indexer: Arc<Indexer>,
}

impl Gateway {
    /// Build a gateway over the Elasticsearch store named in `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = Arc::new(ElasticsearchStore::new(&config.store)?);
        Self::with_store(config, store)
    }

    /// Build a gateway over any [`DocumentStore`].
    pub fn with_store(config: Config, store: Arc<dyn DocumentStore>) -> anyhow::Result<Self> {
        let negotiated = Arc::new(NegotiatedEndpoint::new(config.upstream.initial_endpoint()));
        let upstream = Arc::new(UpstreamAdapter::new(&config.upstream, negotiated)?);
        Ok(Self {
            retriever: Retriever::new(store.clone(), config.retrieval.max_results),
            indexer: Arc::new(Indexer::new(store.clone(), config.store.max_content_chars)),
            injector: ContextInjector::default(),
            upstream,
            store,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn upstream(&self) -> &Arc<UpstreamAdapter> {
        &self.upstream
    }

    pub fn negotiated(&self) -> Endpoint {
        self.upstream.negotiated().get()
    }

    pub fn prober(&self) -> CapabilityProber {
        CapabilityProber::new(self.upstream.clone())
    }

    /// Validate a prompt-style client request and apply defaults.
    pub fn prompt_request(&self, req: ClientRequest) -> GatewayResult<GenerationRequest> {
        let prompt = req
            .prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("prompt is required".into()))?;
        Ok(self.finish_request(Payload::Prompt(prompt), req))
    }

    /// Validate a message-list client request and apply defaults.
    ///
    /// A top-level `system` field is moved into the message list so it
    /// survives augmentation on either endpoint shape.
    pub fn chat_request(&self, mut req: ClientRequest) -> GatewayResult<GenerationRequest> {
        let messages = req.messages.take().unwrap_or_default();
        if !messages.iter().any(|m| m.role == "user") {
            return Err(GatewayError::InvalidRequest(
                "messages must contain a user message".into(),
            ));
        }
        let messages = fold_system(messages, req.system.take());
        Ok(self.finish_request(Payload::Messages(messages), req))
    }

    fn finish_request(&self, payload: Payload, req: ClientRequest) -> GenerationRequest {
        GenerationRequest {
            payload,
            model: req
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.config.upstream.default_model.clone()),
            system: req.system,
            options: req.options,
            stream: req.stream.unwrap_or(false),
            temperature: Some(
                req.temperature
                    .unwrap_or(self.config.upstream.default_temperature),
            ),
        }
    }

    /// Run the full pipeline for one request.
    pub async fn generate(&self, req: GenerationRequest) -> Result<GatewayReply, UpstreamError> {
        let query = req.payload.query_text().unwrap_or_default().to_string();
        let docs = self.retriever.fetch_default(&query).await;
        let rag = RagInfo::from_docs(&docs);
        let model = req.model.clone();

        let augmented = self.injector.build(req, &docs);
        debug!(enhanced = rag.enhanced, docs = rag.docs_count, "request prepared");

        match self.upstream.generate(&augmented).await? {
            UpstreamResponse::Stream { response, .. } => Ok(GatewayReply::Stream { response, rag }),
            UpstreamResponse::Complete { endpoint, body } => {
                let result = to_canonical(&body, endpoint)
                    .map_err(|e| UpstreamError::Malformed(e.to_string()))?;

                if !result.text.trim().is_empty() {
                    let metadata = json!({
                        "query": query,
                        "model": model,
                        "enhanced": rag.enhanced,
                        "ragDocsCount": rag.docs_count,
                    });
                    self.indexer.persist_detached(result.text.clone(), metadata);
                }

                Ok(GatewayReply::Complete {
                    endpoint,
                    raw: body,
                    result,
                    rag,
                    model,
                })
            }
        }
    }

    /// Synchronous ingestion of an uploaded document.
    pub async fn ingest(&self, content: &str, metadata: Value) -> GatewayResult<String> {
        if content.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("content is required".into()));
        }
        match self.indexer.persist_outcome(content, metadata).await {
            PersistOutcome::Saved(id) => Ok(id),
            PersistOutcome::StoreUnavailable => Err(GatewayError::StoreUnavailable),
            PersistOutcome::Skipped => {
                Err(GatewayError::InvalidRequest("content is required".into()))
            }
            PersistOutcome::Failed(msg) => Err(GatewayError::Internal(msg)),
        }
    }

    /// Lexical listing, `limit` defaulting to `retrieval.list_limit`.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<Document> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.retrieval.list_limit);
        self.retriever.fetch(query, limit).await
    }

    pub async fn health(&self) -> HealthReport {
        let (backend, store) = tokio::join!(self.upstream.ping(), self.store.ping());
        HealthReport {
            status: if backend && store { "ok" } else { "degraded" },
            gateway: "rag-gateway",
            version: env!("CARGO_PKG_VERSION"),
            endpoint: self.negotiated(),
            backend,
            store,
        }
    }
}

/// Put `system` ahead of the conversation: before the first system
/// message's content, or as a new leading system message.
fn fold_system(mut messages: Vec<ChatMessage>, system: Option<String>) -> Vec<ChatMessage> {
    let system = match system.filter(|s| !s.trim().is_empty()) {
        Some(s) => s,
        None => return messages,
    };
    match messages.iter_mut().find(|m| m.is_system()) {
        Some(existing) if !existing.content.trim().is_empty() => {
            existing.content = format!("{}\n\n{}", system, existing.content);
        }
        Some(existing) => existing.content = system,
        None => messages.insert(0, ChatMessage::new("system", system)),
    }
    messages
}
