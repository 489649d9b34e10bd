//! Elasticsearch-backed [`DocumentStore`].
//!
//! Talks to the Elasticsearch REST API directly over `reqwest`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | ping | `HEAD /` |
//! | ensure_index | `HEAD /{index}`, then `PUT /{index}` with mappings |
//! | search | `POST /{index}/_search` (fuzzy `match`, `operator: or`) |
//! | save | `POST /{index}/_doc?refresh=wait_for` |
//!
//! # Retry Strategy
//!
//! Search and save retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 250ms, 500ms, 1s, 2s, 4s (capped)
//!
//! The ping never retries; it exists to fail fast.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use rag_gateway_core::models::Document;
use rag_gateway_core::store::DocumentStore;

use crate::config::StoreConfig;

pub struct ElasticsearchStore {
    client: reqwest::Client,
    base_url: String,
    index: String,
    max_retries: u32,
}

impl ElasticsearchStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            max_retries: config.max_retries,
        })
    }

    fn index_url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, self.index, suffix)
    }

    /// Send a JSON request with retry/backoff. Returns the final status and
    /// parsed body (`Null` for empty bodies) for any non-retryable status.
    async fn send_json(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(250 << (attempt - 1).min(4));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.request(method.clone(), url);
            if let Some(b) = body {
                req = req.json(b);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("Elasticsearch error {}: {}", status, text));
                        continue;
                    }
                    let text = response.text().await?;
                    let json = if text.trim().is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&text).unwrap_or(Value::String(text))
                    };
                    return Ok((status, json));
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "Elasticsearch connection error (is it running at {}?): {}",
                        self.base_url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Elasticsearch request failed after retries")))
    }
}

/// Query body for a fuzzy OR match over `content`.
pub fn search_body(query: &str, limit: usize) -> Value {
    json!({
        "query": {
            "match": {
                "content": {
                    "query": query,
                    "operator": "or",
                    "fuzziness": "AUTO"
                }
            }
        },
        "_source": ["content", "metadata", "timestamp"],
        "size": limit
    })
}

/// Index creation body: text content, free-form metadata, date timestamp.
pub fn index_body() -> Value {
    json!({
        "mappings": {
            "properties": {
                "content": { "type": "text" },
                "metadata": { "type": "object" },
                "timestamp": { "type": "date" }
            }
        },
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        }
    })
}

/// Extract `hits.hits[]._source` documents, skipping malformed ones.
pub fn parse_hits(json: &Value) -> Result<Vec<Document>> {
    let hits = json
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Invalid search response: missing hits array"))?;

    Ok(hits
        .iter()
        .filter_map(|hit| {
            let source = hit.get("_source")?.clone();
            match serde_json::from_value::<Document>(source) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    debug!(error = %e, "skipping malformed hit");
                    None
                }
            }
        })
        .collect())
}

fn is_missing_index(status: StatusCode, body: &Value) -> bool {
    status == StatusCode::NOT_FOUND
        && body
            .pointer("/error/type")
            .and_then(Value::as_str)
            .map(|t| t == "index_not_found_exception")
            .unwrap_or(true)
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn ping(&self) -> bool {
        match self.client.head(&self.base_url).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                debug!(error = %e, url = %self.base_url, "store ping failed");
                false
            }
        }
    }

    async fn ensure_index(&self) -> Result<()> {
        let url = self.index_url("");
        let head = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Elasticsearch unreachable at {}: {}", self.base_url, e))?;

        if head.status().is_success() {
            return Ok(());
        }
        if head.status() != StatusCode::NOT_FOUND {
            bail!("Unexpected status {} checking index '{}'", head.status(), self.index);
        }

        let (status, body) = self.send_json(Method::PUT, &url, Some(&index_body())).await?;
        if status.is_success() {
            info!(index = %self.index, "created Elasticsearch index");
            return Ok(());
        }
        let already = body
            .pointer("/error/type")
            .and_then(Value::as_str)
            .map(|t| t == "resource_already_exists_exception")
            .unwrap_or(false);
        if already {
            return Ok(());
        }
        bail!("Failed to create index '{}': {} {}", self.index, status, body)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
        let url = self.index_url("/_search");
        let (status, body) = self
            .send_json(Method::POST, &url, Some(&search_body(query, limit)))
            .await?;

        if is_missing_index(status, &body) {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            bail!("Elasticsearch search error {}: {}", status, body);
        }
        parse_hits(&body)
    }

    async fn save(&self, doc: &Document) -> Result<String> {
        let url = self.index_url("/_doc?refresh=wait_for");
        let payload = serde_json::to_value(doc)?;
        let (status, body) = self.send_json(Method::POST, &url, Some(&payload)).await?;

        if !status.is_success() {
            bail!("Elasticsearch index error {}: {}", status, body);
        }
        body.get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid index response: missing _id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body_shape() {
        let body = search_body("rust async", 3);
        assert_eq!(body["size"], 3);
        assert_eq!(body["query"]["match"]["content"]["operator"], "or");
        assert_eq!(body["query"]["match"]["content"]["fuzziness"], "AUTO");
        assert_eq!(
            body["_source"],
            json!(["content", "metadata", "timestamp"])
        );
    }

    #[test]
    fn test_parse_hits_in_order() {
        let resp = json!({
            "hits": {
                "hits": [
                    {
                        "_id": "a",
                        "_score": 2.0,
                        "_source": {
                            "content": "one",
                            "metadata": {"k": 1},
                            "timestamp": "2024-05-01T10:00:00Z"
                        }
                    },
                    {
                        "_id": "b",
                        "_score": 1.0,
                        "_source": {"content": "two", "timestamp": "2024-05-02T10:00:00Z"}
                    }
                ]
            }
        });
        let docs = parse_hits(&resp).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, "one");
        assert_eq!(docs[0].metadata["k"], 1);
        assert_eq!(docs[1].metadata, json!({}));
    }

    #[test]
    fn test_parse_hits_skips_malformed() {
        let resp = json!({"hits": {"hits": [{"_source": {"metadata": {}}}]}});
        assert!(parse_hits(&resp).unwrap().is_empty());
    }

    #[test]
    fn test_parse_hits_requires_hits() {
        assert!(parse_hits(&json!({"error": "boom"})).is_err());
    }

    #[test]
    fn test_missing_index_detection() {
        let body = json!({"error": {"type": "index_not_found_exception"}});
        assert!(is_missing_index(StatusCode::NOT_FOUND, &body));
        assert!(!is_missing_index(StatusCode::BAD_REQUEST, &body));
    }
}
