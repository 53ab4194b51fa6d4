//! Peer and overlay configuration.
//!
//! Every field has a default so that partial JSON files are accepted:
//!
//! ```json
//! { "peers_per_dimension": [1, 2, 2, 1], "peer": { "request_timeout_ms": 2000 } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::DIMENSIONS;
use crate::overlay::MAX_UNIFORM_SLICES;
use crate::{Error, Result};

/// Settings of a single peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Maximum number of messages handled concurrently by one peer
    pub worker_threads: usize,
    /// How long an initiator waits for all replies of an anycast request
    pub request_timeout_ms: u64,
    /// Age after which an orphaned pending reply entry is dropped
    pub pending_entry_ttl_ms: u64,
    /// Age after which a request id is forgotten by the duplicate filter
    pub seen_request_ttl_ms: u64,
    /// Age after which incomplete notification state and match records are dropped
    pub notification_ttl_ms: u64,
    /// Period of the expiry sweep
    pub sweep_interval_ms: u64,
    /// Maximum number of subscriptions registered on one peer
    pub max_subscriptions: Option<usize>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 8,
            request_timeout_ms: 5_000,
            pending_entry_ttl_ms: 60_000,
            seen_request_ttl_ms: 60_000,
            notification_ttl_ms: 300_000,
            sweep_interval_ms: 5_000,
            max_subscriptions: None,
        }
    }
}

impl PeerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pending_entry_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_entry_ttl_ms)
    }

    pub fn seen_request_ttl(&self) -> Duration {
        Duration::from_millis(self.seen_request_ttl_ms)
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_millis(self.notification_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be at least 1".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".to_string()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::Config("sweep_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Shape of an in-process overlay and the settings shared by its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Number of zone slices along graph, subject, predicate and object
    pub peers_per_dimension: [usize; DIMENSIONS],
    pub peer: PeerConfig,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { peers_per_dimension: [1, 2, 2, 2], peer: PeerConfig::default() }
    }
}

impl OverlayConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OverlayConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn peer_count(&self) -> usize {
        self.peers_per_dimension.iter().product()
    }

    pub fn validate(&self) -> Result<()> {
        if self.peers_per_dimension.iter().any(|&count| count == 0) {
            return Err(Error::Config(
                "peers_per_dimension entries must be at least 1".to_string(),
            ));
        }
        if self.peers_per_dimension.iter().any(|&count| count > MAX_UNIFORM_SLICES) {
            return Err(Error::Config(format!(
                "peers_per_dimension entries must be at most {}",
                MAX_UNIFORM_SLICES
            )));
        }
        self.peer.validate()
    }
}
