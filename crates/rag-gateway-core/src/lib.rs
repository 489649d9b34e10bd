//! # RAG Gateway Core
//!
//! Runtime-agnostic logic for RAG Gateway: the request/response model,
//! endpoint negotiation state, context injection, response normalization
//! and the document store abstraction.
//!
//! This crate contains no tokio, reqwest, axum or other I/O dependencies.
//! Network-facing pieces (the Elasticsearch store, the upstream adapter,
//! the HTTP surface) live in the `rag-gateway` application crate.

pub mod endpoint;
pub mod inject;
pub mod models;
pub mod normalize;
pub mod store;
