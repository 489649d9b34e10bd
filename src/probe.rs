//! Capability probe: which generation API does the backend expose?
//!
//! Sends a one-token synthetic request to the chat endpoint and, if the
//! backend says that endpoint does not exist, to the completion endpoint.
//! The first shape that answers becomes the negotiated endpoint. When
//! neither answers the previous value is kept and the gateway keeps
//! serving in a degraded state: retrieval, ingestion and the proxy do not
//! need the backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use rag_gateway_core::endpoint::Endpoint;

use crate::upstream::{UpstreamAdapter, UpstreamError};

pub struct CapabilityProber {
    adapter: Arc<UpstreamAdapter>,
}

impl CapabilityProber {
    pub fn new(adapter: Arc<UpstreamAdapter>) -> Self {
        Self { adapter }
    }

    /// Probe once and return the (possibly unchanged) negotiated endpoint.
    pub async fn probe(&self) -> Endpoint {
        let negotiated = self.adapter.negotiated();
        let req = self.adapter.probe_request();

        match self.adapter.call(&req, Endpoint::Chat).await {
            Ok(_) => {
                negotiated.set(Endpoint::Chat);
                info!(endpoint = "chat", "backend capability negotiated");
                return Endpoint::Chat;
            }
            Err(UpstreamError::Unsupported { status, .. }) => {
                info!(status, "chat endpoint unsupported, trying completion");
            }
            Err(e) => {
                let current = negotiated.get();
                warn!(error = %e, endpoint = %current, "capability probe failed, running degraded");
                return current;
            }
        }

        match self.adapter.call(&req, Endpoint::Completion).await {
            Ok(_) => {
                negotiated.set(Endpoint::Completion);
                info!(endpoint = "completion", "backend capability negotiated");
                Endpoint::Completion
            }
            Err(e) => {
                let current = negotiated.get();
                warn!(
                    error = %e,
                    endpoint = %current,
                    "no generation endpoint answered, running degraded"
                );
                current
            }
        }
    }

    /// Run [`probe`](Self::probe) in the background after `delay`.
    pub fn spawn_delayed(self, delay: Duration) -> JoinHandle<Endpoint> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.probe().await
        })
    }
}
