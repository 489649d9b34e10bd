//! Gateway configuration.
//!
//! Loaded from a TOML file whose sections all have defaults, then
//! overlaid with a handful of environment variables so container
//! deployments can be configured without a file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PORT` | port part of `server.bind` |
//! | `OLLAMA_BASE_URL` | `upstream.base_url` |
//! | `DEFAULT_MODEL` | `upstream.default_model` |
//! | `ELASTICSEARCH_URL` | `store.url` |
//! | `ELASTICSEARCH_INDEX` | `store.index` |
//! | `MAX_RESULTS` | `retrieval.max_results` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use rag_gateway_core::endpoint::Endpoint;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3100".to_string()
}
fn default_body_limit() -> usize {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_completion_path")]
    pub completion_path: String,
    #[serde(default = "default_initial_endpoint")]
    pub initial_endpoint: String,
    #[serde(default = "default_probe_delay")]
    pub probe_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            timeout_secs: default_upstream_timeout(),
            chat_path: default_chat_path(),
            completion_path: default_completion_path(),
            initial_endpoint: default_initial_endpoint(),
            probe_delay_ms: default_probe_delay(),
        }
    }
}

fn default_upstream_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3:8b".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_upstream_timeout() -> u64 {
    120
}
fn default_chat_path() -> String {
    "/api/chat".to_string()
}
fn default_completion_path() -> String {
    "/api/generate".to_string()
}
fn default_initial_endpoint() -> String {
    "chat".to_string()
}
fn default_probe_delay() -> u64 {
    2000
}

impl UpstreamConfig {
    /// Parsed `initial_endpoint`. Validated by [`load_config`].
    pub fn initial_endpoint(&self) -> Endpoint {
        self.initial_endpoint.parse().unwrap_or(Endpoint::Chat)
    }

    /// Absolute URL for one of the two generation shapes.
    pub fn url_for(&self, endpoint: Endpoint) -> String {
        let path = match endpoint {
            Endpoint::Chat => &self.chat_path,
            Endpoint::Completion => &self.completion_path,
        };
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            index: default_index(),
            timeout_secs: default_store_timeout(),
            max_retries: default_max_retries(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_store_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index() -> String {
    "ollama-rag".to_string()
}
fn default_store_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_content_chars() -> usize {
    50_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            list_limit: default_list_limit(),
        }
    }
}

fn default_max_results() -> usize {
    3
}
fn default_list_limit() -> usize {
    10
}

/// Read, overlay and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config, |k| std::env::var(k).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    let mut config = Config::default();
    apply_env_overrides(&mut config, |k| std::env::var(k).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Overlay environment variables. `lookup` is injectable for tests.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT") {
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("PORT must be a port number, got '{}'", port))?;
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind = format!("{}:{}", host, port);
    }
    if let Some(url) = lookup("OLLAMA_BASE_URL") {
        config.upstream.base_url = url;
    }
    if let Some(model) = lookup("DEFAULT_MODEL") {
        config.upstream.default_model = model;
    }
    if let Some(url) = lookup("ELASTICSEARCH_URL") {
        config.store.url = url;
    }
    if let Some(index) = lookup("ELASTICSEARCH_INDEX") {
        config.store.index = index;
    }
    if let Some(k) = lookup("MAX_RESULTS") {
        config.retrieval.max_results = k
            .trim()
            .parse()
            .with_context(|| format!("MAX_RESULTS must be a positive integer, got '{}'", k))?;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.max_results < 1 {
        bail!("retrieval.max_results must be >= 1");
    }
    if config.retrieval.list_limit < 1 {
        bail!("retrieval.list_limit must be >= 1");
    }
    if config.store.max_content_chars < 1 {
        bail!("store.max_content_chars must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.upstream.default_temperature) {
        bail!("upstream.default_temperature must be in [0.0, 2.0]");
    }
    if config.upstream.base_url.trim().is_empty() {
        bail!("upstream.base_url must not be empty");
    }
    if config.store.url.trim().is_empty() {
        bail!("store.url must not be empty");
    }
    if config.store.index.trim().is_empty() {
        bail!("store.index must not be empty");
    }
    config
        .upstream
        .initial_endpoint
        .parse::<Endpoint>()
        .with_context(|| "Invalid upstream.initial_endpoint")?;
    Ok(())
}
