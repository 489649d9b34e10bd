//! Shared helpers: a scriptable fake backend and gateway construction.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rag_gateway::config::Config;
use rag_gateway::pipeline::Gateway;
use rag_gateway_core::store::memory::InMemoryStore;

/// NDJSON the fake backend streams back for `stream: true`.
pub const STREAM_BODY: &str = concat!(
    "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
    "{\"message\":{\"content\":\"lo\"},\"done\":true}\n",
);

/// A backend that exposes the chat and/or completion shape.
#[derive(Clone)]
pub struct FakeBackend {
    pub chat_enabled: bool,
    pub completion_enabled: bool,
    pub chat_calls: Arc<AtomicUsize>,
    pub completion_calls: Arc<AtomicUsize>,
    pub last_body: Arc<Mutex<Option<Value>>>,
}

impl FakeBackend {
    pub fn new(chat_enabled: bool, completion_enabled: bool) -> Self {
        Self {
            chat_enabled,
            completion_enabled,
            chat_calls: Arc::new(AtomicUsize::new(0)),
            completion_calls: Arc::new(AtomicUsize::new(0)),
            last_body: Arc::new(Mutex::new(None)),
        }
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn completion_calls(&self) -> usize {
        self.completion_calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Value {
        self.last_body.lock().unwrap().clone().unwrap_or(Value::Null)
    }

    pub async fn spawn(self) -> SocketAddr {
        let app = Router::new()
            .route("/", get(|| async { "Ollama is running" }))
            .route("/api/chat", post(fake_chat))
            .route("/api/generate", post(fake_generate))
            .route(
                "/api/tags",
                get(|| async { Json(json!({"models": [{"name": "llama3:8b"}]})) }),
            )
            .with_state(self);
        spawn_app(app).await
    }
}

async fn fake_chat(State(b): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    b.chat_calls.fetch_add(1, Ordering::SeqCst);
    *b.last_body.lock().unwrap() = Some(body.clone());
    if !b.chat_enabled {
        return (StatusCode::NOT_FOUND, "404 page not found").into_response();
    }
    if body["stream"] == true {
        return (
            [("content-type", "application/x-ndjson")],
            STREAM_BODY,
        )
            .into_response();
    }
    Json(json!({
        "model": body["model"],
        "message": {"role": "assistant", "content": "chat answer"},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 3,
        "eval_count": 2
    }))
    .into_response()
}

async fn fake_generate(State(b): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    b.completion_calls.fetch_add(1, Ordering::SeqCst);
    *b.last_body.lock().unwrap() = Some(body.clone());
    if !b.completion_enabled {
        return (StatusCode::NOT_FOUND, "404 page not found").into_response();
    }
    Json(json!({
        "model": body["model"],
        "response": "completion answer",
        "done": true,
        "prompt_eval_count": 4,
        "eval_count": 1
    }))
    .into_response()
}

/// Serve `app` on an ephemeral local port.
pub async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn test_config(backend: SocketAddr) -> Config {
    let mut cfg = Config::default();
    cfg.upstream.base_url = format!("http://{}", backend);
    cfg.upstream.timeout_secs = 5;
    cfg.upstream.probe_delay_ms = 0;
    cfg
}

pub fn gateway(backend: SocketAddr, store: Arc<InMemoryStore>) -> Arc<Gateway> {
    Arc::new(Gateway::with_store(test_config(backend), store).unwrap())
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..40 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}
