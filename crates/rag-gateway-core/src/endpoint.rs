//! Upstream endpoint shapes and the shared negotiation cell.
//!
//! The backend exposes one of two mutually incompatible generation APIs.
//! [`Endpoint`] names them; [`NegotiatedEndpoint`] holds the one currently
//! believed to work. The cell is shared by every request, so writers use
//! [`NegotiatedEndpoint::compare_and_swap`] to flip it: two requests that
//! observe the same stale value can only move it to the same new value.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// One of the two upstream generation API shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Message-list API (`/api/chat`).
    Chat,
    /// Prompt API (`/api/generate`).
    Completion,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Chat => "chat",
            Endpoint::Completion => "completion",
        }
    }

    /// The other shape.
    pub fn alternate(self) -> Self {
        match self {
            Endpoint::Chat => Endpoint::Completion,
            Endpoint::Completion => Endpoint::Chat,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Endpoint::Chat => 0,
            Endpoint::Completion => 1,
        }
    }

    fn from_u8(v: u8) -> Self {
        if v == 1 {
            Endpoint::Completion
        } else {
            Endpoint::Chat
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Endpoint::Chat),
            "completion" | "generate" => Ok(Endpoint::Completion),
            other => bail!("Unknown endpoint: '{}'. Must be chat or completion.", other),
        }
    }
}

/// Process-wide negotiated endpoint.
///
/// Injected into the upstream adapter and the prober as an `Arc`.
#[derive(Debug)]
pub struct NegotiatedEndpoint {
    current: AtomicU8,
}

impl NegotiatedEndpoint {
    pub fn new(initial: Endpoint) -> Self {
        Self {
            current: AtomicU8::new(initial.to_u8()),
        }
    }

    pub fn get(&self) -> Endpoint {
        Endpoint::from_u8(self.current.load(Ordering::Acquire))
    }

    /// Unconditional write. Used by the prober, which has just observed
    /// the backend answer on `value`.
    pub fn set(&self, value: Endpoint) {
        self.current.store(value.to_u8(), Ordering::Release);
    }

    /// Replace `expected` with `new`. Returns `false` (and leaves the cell
    /// alone) when the current value is no longer `expected`.
    pub fn compare_and_swap(&self, expected: Endpoint, new: Endpoint) -> bool {
        self.current
            .compare_exchange(
                expected.to_u8(),
                new.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for NegotiatedEndpoint {
    fn default() -> Self {
        Self::new(Endpoint::Chat)
    }
}
