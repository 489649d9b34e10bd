//! # RAG Gateway
//!
//! A retrieval-augmented gateway between chat clients and an Ollama-style
//! model backend.
//!
//! Every generation request is enriched with documents retrieved from
//! Elasticsearch before it is forwarded, and every answer is archived back
//! into the same index so later questions can build on it.
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────────┐   ┌─────────────────┐   ┌──────────────────┐
//! client ──▶ │ Retriever  │──▶│ ContextInjector │──▶│ UpstreamAdapter  │──▶ backend
//!            └─────┬──────┘   └─────────────────┘   └────────┬─────────┘
//!                  │                                          │
//!            ┌─────▼──────┐                          ┌────────▼─────────┐
//!            │ Document   │◀──── Indexer (detached) ─│ Normalizer       │──▶ client
//!            │ store (ES) │                          └──────────────────┘
//!            └────────────┘
//! ```
//!
//! The backend may expose a chat API or a prompt API. Which one is in use
//! is negotiated at startup by the [`probe`] and corrected on the fly by
//! the [`upstream`] adapter when the backend rejects a shape.
//!
//! ## Quick Start
//!
//! ```bash
//! rag-gateway init                       # create the index
//! rag-gateway ingest --file notes.md     # add a document
//! rag-gateway search "deployment"        # inspect retrieval
//! rag-gateway serve                      # start the HTTP gateway
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`elastic`] | Elasticsearch `DocumentStore` |
//! | [`retrieval`] | Top-K retrieval with graceful degradation |
//! | [`indexer`] | Best-effort archiving |
//! | [`upstream`] | Request shaping, endpoint flip-and-retry |
//! | [`probe`] | Startup capability negotiation |
//! | [`pipeline`] | The end-to-end request flow |
//! | [`server`] | HTTP routes |
//! | [`error`] | HTTP error taxonomy |

pub mod config;
pub mod elastic;
pub mod error;
pub mod indexer;
pub mod pipeline;
pub mod probe;
pub mod retrieval;
pub mod server;
pub mod upstream;
