//! Upstream adapter: one canonical request, two backend API shapes.
//!
//! The backend speaks either the message-list API ([`Endpoint::Chat`]) or
//! the prompt API ([`Endpoint::Completion`]). [`UpstreamAdapter::generate`]
//! shapes the request for the currently negotiated endpoint and, when the
//! backend answers that the endpoint does not exist, flips the shared
//! [`NegotiatedEndpoint`] and retries exactly once with the other shape.
//!
//! # Error classes
//!
//! | Backend behaviour | Result |
//! |-------------------|--------|
//! | HTTP 404 / 405 / 501 (not a missing model) | [`UpstreamError::Unsupported`], triggers the flip |
//! | both shapes unsupported | [`UpstreamError::ShapeMismatch`] |
//! | any other non-2xx | [`UpstreamError::Status`], no flip |
//! | connect / timeout | [`UpstreamError::Transport`], no flip |
//! | 2xx with a non-JSON body | [`UpstreamError::Malformed`], no flip |

use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use rag_gateway_core::endpoint::{Endpoint, NegotiatedEndpoint};
use rag_gateway_core::models::{ChatMessage, GenerationRequest, Payload};

use crate::config::UpstreamConfig;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("backend does not support the {endpoint} endpoint (HTTP {status})")]
    Unsupported { endpoint: Endpoint, status: u16 },

    #[error("backend supports neither the chat nor the completion endpoint")]
    ShapeMismatch,

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// What the backend sent back.
#[derive(Debug)]
pub enum UpstreamResponse {
    /// A fully read JSON payload.
    Complete { endpoint: Endpoint, body: Value },
    /// An unread streaming body, to be relayed as-is.
    Stream {
        endpoint: Endpoint,
        response: reqwest::Response,
    },
}

impl UpstreamResponse {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            UpstreamResponse::Complete { endpoint, .. } => *endpoint,
            UpstreamResponse::Stream { endpoint, .. } => *endpoint,
        }
    }
}

/// Raw relay of a non-generation backend call.
#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

pub struct UpstreamAdapter {
    client: reqwest::Client,
    config: UpstreamConfig,
    negotiated: Arc<NegotiatedEndpoint>,
    timeout: Duration,
}

impl UpstreamAdapter {
    /// Build an adapter sharing `negotiated` with the rest of the process.
    ///
    /// The client only carries a connect timeout; the full-request timeout
    /// is applied per call to non-streamed requests so long streams are not
    /// cut off.
    pub fn new(
        config: &UpstreamConfig,
        negotiated: Arc<NegotiatedEndpoint>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            negotiated,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn negotiated(&self) -> &Arc<NegotiatedEndpoint> {
        &self.negotiated
    }

    /// Issue `req` against the negotiated endpoint, flipping and retrying
    /// once on a shape mismatch.
    #[instrument(skip(self, req), fields(model = %req.model, stream = req.stream))]
    pub async fn generate(
        &self,
        req: &GenerationRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let first = self.negotiated.get();
        match self.call(req, first).await {
            Err(UpstreamError::Unsupported { status, .. }) => {
                let alternate = first.alternate();
                if self.negotiated.compare_and_swap(first, alternate) {
                    warn!(
                        from = %first,
                        to = %alternate,
                        status,
                        "backend rejected endpoint, switching"
                    );
                } else {
                    debug!(to = %alternate, "endpoint already switched by another request");
                }
                match self.call(req, alternate).await {
                    Err(UpstreamError::Unsupported { status, .. }) => {
                        warn!(status, "backend rejected both endpoint shapes");
                        Err(UpstreamError::ShapeMismatch)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// One call against a fixed endpoint. Never touches the negotiated value.
    pub async fn call(
        &self,
        req: &GenerationRequest,
        endpoint: Endpoint,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.config.url_for(endpoint);
        let body = shape_request(req, endpoint);
        debug!(url = %url, endpoint = %endpoint, "calling backend");

        let mut builder = self.client.post(&url).json(&body);
        if !req.stream {
            builder = builder.timeout(self.timeout);
        }
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(endpoint, status, text));
        }

        if req.stream {
            return Ok(UpstreamResponse::Stream { endpoint, response });
        }

        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::Malformed(format!("{} (body: {:.200})", e, text)))?;
        Ok(UpstreamResponse::Complete { endpoint, body })
    }

    /// Minimal synthetic request used by the capability probe.
    pub fn probe_request(&self) -> GenerationRequest {
        GenerationRequest {
            payload: Payload::Prompt("ping".to_string()),
            model: self.config.default_model.clone(),
            system: None,
            options: Some(json!({ "num_predict": 1 })),
            stream: false,
            temperature: None,
        }
    }

    /// Backend liveness: any 2xx from the base URL.
    pub async fn ping(&self) -> bool {
        match self
            .client
            .get(&self.config.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                debug!(error = %e, "backend ping failed");
                false
            }
        }
    }

    /// Relay an arbitrary call to `{base_url}{path}` untouched.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        body: Vec<u8>,
    ) -> Result<ForwardedResponse, UpstreamError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path_and_query);
        let mut builder = self.client.request(method.clone(), &url).timeout(self.timeout);
        if method != Method::GET && method != Method::HEAD && !body.is_empty() {
            builder = builder.header("content-type", "application/json").body(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(ForwardedResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Decide whether a failed call means "wrong shape" or something else.
///
/// Ollama also answers 404 for a model that is not pulled
/// (`{"error": "model 'x' not found"}`); that is a request error, not a
/// missing endpoint.
pub fn classify_failure(endpoint: Endpoint, status: StatusCode, body: String) -> UpstreamError {
    let code = status.as_u16();
    let shape_status = matches!(code, 404 | 405 | 501);
    let missing_model = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_lowercase))
        .map(|e| e.contains("model"))
        .unwrap_or(false);

    if shape_status && !missing_model {
        UpstreamError::Unsupported {
            endpoint,
            status: code,
        }
    } else {
        UpstreamError::Status { status: code, body }
    }
}

/// Build the wire body for `endpoint`.
pub fn shape_request(req: &GenerationRequest, endpoint: Endpoint) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(req.model));
    body.insert("stream".into(), json!(req.stream));

    match endpoint {
        Endpoint::Chat => {
            body.insert("messages".into(), json!(chat_messages(req)));
        }
        Endpoint::Completion => {
            let (prompt, system) = completion_prompt(req);
            body.insert("prompt".into(), json!(prompt));
            if let Some(s) = system {
                body.insert("system".into(), json!(s));
            }
        }
    }

    if let Some(options) = merged_options(req) {
        body.insert("options".into(), options);
    }
    Value::Object(body)
}

/// `system` first when present, then the conversation or a single user turn.
fn chat_messages(req: &GenerationRequest) -> Vec<ChatMessage> {
    let system = req.system.as_deref().filter(|s| !s.trim().is_empty());
    match &req.payload {
        Payload::Prompt(prompt) => {
            let mut out = Vec::with_capacity(2);
            if let Some(s) = system {
                out.push(ChatMessage::new("system", s));
            }
            out.push(ChatMessage::new("user", prompt.as_str()));
            out
        }
        Payload::Messages(messages) => {
            let mut out = messages.clone();
            if let Some(s) = system {
                if !out.iter().any(ChatMessage::is_system) {
                    out.insert(0, ChatMessage::new("system", s));
                }
            }
            out
        }
    }
}

/// Flatten a conversation for the prompt API: system turns become the
/// `system` field, the rest a role-tagged transcript ending on an open
/// assistant turn.
fn completion_prompt(req: &GenerationRequest) -> (String, Option<String>) {
    match &req.payload {
        Payload::Prompt(prompt) => (prompt.clone(), req.system.clone()),
        Payload::Messages(messages) => {
            let mut systems: Vec<&str> = req.system.as_deref().into_iter().collect();
            let mut transcript = String::new();
            for m in messages {
                if m.is_system() {
                    systems.push(&m.content);
                    continue;
                }
                transcript.push_str(&format!("{}: {}\n\n", capitalize(&m.role), m.content));
            }
            transcript.push_str("Assistant:");
            let system = (!systems.is_empty()).then(|| systems.join("\n\n"));
            (transcript, system)
        }
    }
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Client options with `temperature` folded in unless the client set it there.
fn merged_options(req: &GenerationRequest) -> Option<Value> {
    let mut options = match &req.options {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        // Not an object: pass through untouched.
        Some(other) => return Some(other.clone()),
    };
    if let Some(t) = req.temperature {
        options.entry("temperature").or_insert(json!(t));
    }
    (!options.is_empty()).then_some(Value::Object(options))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(payload: Payload, system: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            payload,
            model: "llama3:8b".to_string(),
            system: system.map(str::to_string),
            options: None,
            stream: false,
            temperature: Some(0.7),
        }
    }

    #[test]
    fn test_chat_shape_system_first() {
        let req = request(Payload::Prompt("hi".into()), Some("be brief"));
        let body = shape_request(&req, Endpoint::Chat);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], "be brief");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[1]["content"], "hi");
        assert!(body.get("prompt").is_none());
        assert_eq!(body["options"]["temperature"], 0.7);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_chat_shape_without_system() {
        let req = request(Payload::Prompt("hi".into()), None);
        let body = shape_request(&req, Endpoint::Chat);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_completion_shape_separate_fields() {
        let req = request(Payload::Prompt("hi".into()), Some("be brief"));
        let body = shape_request(&req, Endpoint::Completion);
        assert_eq!(body["prompt"], "hi");
        assert_eq!(body["system"], "be brief");
        assert!(body.get("messages").is_none());
    }

    #[test]
    fn test_completion_shape_flattens_messages() {
        let req = request(
            Payload::Messages(vec![
                ChatMessage::new("system", "rules"),
                ChatMessage::new("user", "hello"),
                ChatMessage::new("assistant", "hey"),
                ChatMessage::new("user", "again"),
            ]),
            None,
        );
        let body = shape_request(&req, Endpoint::Completion);
        assert_eq!(body["system"], "rules");
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("User: hello"));
        assert!(prompt.contains("Assistant: hey"));
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn test_client_temperature_option_wins() {
        let mut req = request(Payload::Prompt("hi".into()), None);
        req.options = Some(json!({"temperature": 0.1, "num_ctx": 2048}));
        let body = shape_request(&req, Endpoint::Completion);
        assert_eq!(body["options"]["temperature"], 0.1);
        assert_eq!(body["options"]["num_ctx"], 2048);
    }

    #[test]
    fn test_no_options_when_nothing_to_send() {
        let mut req = request(Payload::Prompt("hi".into()), None);
        req.temperature = None;
        let body = shape_request(&req, Endpoint::Chat);
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_classify_not_found_is_unsupported() {
        let err = classify_failure(
            Endpoint::Chat,
            StatusCode::NOT_FOUND,
            "404 page not found".into(),
        );
        assert!(matches!(
            err,
            UpstreamError::Unsupported {
                endpoint: Endpoint::Chat,
                status: 404
            }
        ));
    }

    #[test]
    fn test_classify_missing_model_is_not_shape_error() {
        let err = classify_failure(
            Endpoint::Chat,
            StatusCode::NOT_FOUND,
            r#"{"error":"model 'mistral' not found, try pulling it first"}"#.into(),
        );
        assert!(matches!(err, UpstreamError::Status { status: 404, .. }));
    }

    #[test]
    fn test_classify_server_error() {
        let err = classify_failure(Endpoint::Completion, StatusCode::BAD_GATEWAY, "oops".into());
        assert!(matches!(err, UpstreamError::Status { status: 502, .. }));
    }
}
