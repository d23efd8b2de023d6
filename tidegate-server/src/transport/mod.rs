//! Transport layer
//!
//! The server speaks HTTP/JSON. The [`Transport`] trait keeps the listener
//! pluggable so additional protocols can slot in beside it.

pub mod http;

#[cfg(test)]
mod http_test;

use crate::gate::Gate;
use anyhow::Result;
use async_trait::async_trait;

/// A protocol listener serving the gate.
#[async_trait]
pub trait Transport {
    /// Bind and serve until shutdown or error.
    async fn start(self, gate: Gate) -> Result<()>;
}
