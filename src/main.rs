//! # RAG Gateway CLI (`rag-gateway`)
//!
//! Runs the gateway and gives operators direct access to the pieces it is
//! built from.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag-gateway serve` | Start the HTTP gateway |
//! | `rag-gateway probe` | Negotiate the backend endpoint once and print it |
//! | `rag-gateway init` | Create the Elasticsearch index if missing |
//! | `rag-gateway search "<query>"` | Run retrieval and print the hits |
//! | `rag-gateway ingest` | Store a document synchronously |
//!
//! ## Logging
//!
//! Controlled through `RUST_LOG` (default `info,tower_http=warn`).

use anyhow::bail;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rag_gateway::config;
use rag_gateway::pipeline::Gateway;
use rag_gateway::server;

/// RAG Gateway — retrieval-augmented proxy for Ollama-style backends.
#[derive(Parser)]
#[command(name = "rag-gateway", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is not an error: defaults plus environment overrides
    /// (`PORT`, `OLLAMA_BASE_URL`, `ELASTICSEARCH_URL`, ...) are used.
    #[arg(long, global = true, default_value = "./config/gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    Serve,

    /// Probe the backend once and print the negotiated endpoint.
    Probe,

    /// Create the document index if it does not exist.
    Init,

    /// Search stored documents the way request augmentation does.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of documents to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Store a document and wait until it is searchable.
    Ingest {
        /// Read content from this file.
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,

        /// Inline content.
        #[arg(long)]
        content: Option<String>,

        /// Metadata as `key=value` pairs.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;
    let gateway = Arc::new(Gateway::from_config(cfg)?);

    match cli.command {
        Commands::Serve => {
            server::run_server(gateway).await?;
        }
        Commands::Probe => {
            let endpoint = gateway.prober().probe().await;
            println!("negotiated endpoint: {}", endpoint);
        }
        Commands::Init => {
            gateway.store().ensure_index().await?;
            println!("index '{}' ready", gateway.config().store.index);
        }
        Commands::Search { query, limit } => {
            let docs = gateway.search(&query, limit).await;
            if docs.is_empty() {
                println!("No results.");
            }
            for (i, doc) in docs.iter().enumerate() {
                let preview: String = doc.content.chars().take(200).collect();
                println!("{}. [{}] {}", i + 1, doc.timestamp.to_rfc3339(), preview);
            }
        }
        Commands::Ingest {
            file,
            content,
            meta,
        } => {
            let content = match (file, content) {
                (Some(path), _) => std::fs::read_to_string(&path)?,
                (None, Some(c)) => c,
                (None, None) => bail!("either --file or --content is required"),
            };
            let metadata: Map<String, Value> = meta
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let id = gateway.ingest(&content, Value::Object(metadata)).await?;
            println!("stored document {}", id);
        }
    }

    Ok(())
}
