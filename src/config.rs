//! Hub configuration, read from an optional TOML file and overridden by CLI flags.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the station gateway listens on.
    pub listen: String,
    pub retry: RetryPolicy,
    pub broadcast: BroadcastConfig,
    /// Upper bound for snapshot queries.
    pub snapshot_limit: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7878".to_string(),
            retry: RetryPolicy::default(),
            broadcast: BroadcastConfig::default(),
            snapshot_limit: 200,
        }
    }
}

impl HubConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Events buffered per connection before it is dropped as too slow.
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

/// Settings for a station-side client adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub snapshot_limit: usize,
    /// Entries kept in the rolling feed.
    pub feed_capacity: usize,
    pub reconnect: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: 50,
            feed_capacity: 200,
            reconnect: RetryPolicy::default(),
        }
    }
}
