//! HTTP surface of the gateway.
//!
//! Speaks the Ollama-style `/api/*` dialect so existing clients (Open
//! WebUI and friends) can point at the gateway instead of the backend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/health` | Dependency liveness and negotiated endpoint |
//! | `POST` | `/api/generate` | Prompt generation with retrieval augmentation |
//! | `POST` | `/api/chat/completions` | Chat generation; OpenAI envelope or relayed stream |
//! | `POST` | `/api/rag/documents` | Store one document (synchronous) |
//! | `POST` | `/api/rag/documents/bulk` | Store an array of documents |
//! | `GET`  | `/api/rag/documents` | Lexical search over stored documents |
//! | `*`    | `/api/{*path}` | Anything else, relayed to the backend |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use rag_gateway_core::models::{Document, RagInfo};
use rag_gateway_core::normalize::to_openai_envelope;

use crate::error::{GatewayError, GatewayResult};
use crate::pipeline::{ClientRequest, Gateway, GatewayReply, HealthReport};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
}

/// Build the router without binding. Used by [`run_server`] and tests.
pub fn router(gateway: Arc<Gateway>) -> Router {
    let body_limit = gateway.config().server.body_limit_bytes;
    let state = AppState { gateway };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/generate", post(handle_generate))
        .route("/api/chat/completions", post(handle_chat))
        .route(
            "/api/rag/documents",
            post(handle_ingest).get(handle_list_documents),
        )
        .route("/api/rag/documents/bulk", post(handle_bulk_ingest))
        .route("/api/{*path}", any(handle_proxy))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway.
///
/// Creates the index if needed (non-fatal), schedules the capability
/// probe in the background and serves until the process is terminated.
pub async fn run_server(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let bind_addr = gateway.config().server.bind.clone();
    let probe_delay = Duration::from_millis(gateway.config().upstream.probe_delay_ms);

    if let Err(e) = gateway.store().ensure_index().await {
        warn!(error = %e, "document store setup failed, starting anyway");
    }
    gateway.prober().spawn_delayed(probe_delay);

    let app = router(gateway);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "rag gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ GET /api/health ============

async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.gateway.health().await)
}

// ============ POST /api/generate ============

async fn handle_generate(
    State(state): State<AppState>,
    body: Result<Json<ClientRequest>, JsonRejection>,
) -> GatewayResult<Response> {
    let Json(body) = body?;
    let req = state.gateway.prompt_request(body)?;
    match state.gateway.generate(req).await? {
        GatewayReply::Stream { response, .. } => Ok(relay_stream(response)),
        GatewayReply::Complete {
            raw, result, rag, ..
        } => {
            let mut out = match raw {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            out.entry("response").or_insert_with(|| json!(result.text));
            out.insert("rag".into(), json!(rag));
            Ok(Json(Value::Object(out)).into_response())
        }
    }
}

// ============ POST /api/chat/completions ============

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ClientRequest>, JsonRejection>,
) -> GatewayResult<Response> {
    let Json(body) = body?;
    let req = state.gateway.chat_request(body)?;
    match state.gateway.generate(req).await? {
        GatewayReply::Stream { response, .. } => Ok(relay_stream(response)),
        GatewayReply::Complete {
            result, rag, model, ..
        } => Ok(Json(with_rag(json!(to_openai_envelope(&result, &model)), rag)).into_response()),
    }
}

fn with_rag(mut value: Value, rag: RagInfo) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("rag".into(), json!(rag));
    }
    value
}

/// Pass the backend's streaming body through byte for byte.
fn relay_stream(response: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::OK);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| HeaderValue::from_str(v).ok());

    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    if let Some(ct) = content_type {
        out.headers_mut().insert(CONTENT_TYPE, ct);
    }
    out
}

// ============ /api/rag/documents ============

#[derive(Deserialize)]
struct IngestBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestBody>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let Json(body) = body?;
    let content = body.content.unwrap_or_default();
    let id = state
        .gateway
        .ingest(&content, body.metadata.unwrap_or_else(|| json!({})))
        .await?;
    Ok(Json(json!({
        "success": true,
        "id": id,
        "message": "document stored",
    })))
}

async fn handle_bulk_ingest(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let Json(body) = body?;
    let items = match body {
        Value::Array(items) => items,
        _ => {
            return Err(GatewayError::InvalidRequest(
                "expected an array of documents".into(),
            ))
        }
    };

    if !state.gateway.store().ping().await {
        return Err(GatewayError::StoreUnavailable);
    }

    let mut saved = 0usize;
    let mut failed = 0usize;
    for item in &items {
        let content = item.get("content").and_then(Value::as_str).unwrap_or("");
        let metadata = item.get("metadata").cloned().unwrap_or_else(|| json!({}));
        match state.gateway.ingest(content, metadata).await {
            Ok(_) => saved += 1,
            Err(_) => failed += 1,
        }
    }

    Ok(Json(json!({
        "success": failed == 0,
        "total": items.len(),
        "saved": saved,
        "failed": failed,
    })))
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Document>> {
    let limit = params.limit.and_then(|l| l.trim().parse::<usize>().ok());
    let query = params.query.unwrap_or_default();
    Json(state.gateway.search(&query, limit).await)
}

// ============ /api/{*path} ============

async fn handle_proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> GatewayResult<Response> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

    let forwarded = state
        .gateway
        .upstream()
        .forward(method, &path_and_query, body.to_vec())
        .await?;

    let status = StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = Response::new(Body::from(forwarded.body));
    *out.status_mut() = status;
    if let Some(ct) = forwarded
        .content_type
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        out.headers_mut().insert(CONTENT_TYPE, ct);
    }
    Ok(out)
}
