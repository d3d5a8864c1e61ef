//! Session and stack configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use candiag_tp::TpTimings;

/// Session-layer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Deadline waiting for a matching response, ms. Reset whenever the
    /// server answers "response pending".
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Interval between long-wait callbacks while a poll is in
    /// progress, ms.
    #[serde(default = "default_long_wait_interval_ms")]
    pub long_wait_interval_ms: u64,
    /// Window during which broadcast responses are collected, ms. The
    /// window is always exhausted; multiple nodes may answer.
    #[serde(default = "default_broadcast_window_ms")]
    pub broadcast_window_ms: u64,
    /// Largest service payload accepted or produced, bytes.
    #[serde(default = "default_max_service_size")]
    pub max_service_size: usize,
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_long_wait_interval_ms() -> u64 {
    2000
}

fn default_broadcast_window_ms() -> u64 {
    500
}

fn default_max_service_size() -> usize {
    4095
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            long_wait_interval_ms: default_long_wait_interval_ms(),
            broadcast_window_ms: default_broadcast_window_ms(),
            max_service_size: default_max_service_size(),
        }
    }
}

impl SessionSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn long_wait_interval(&self) -> Duration {
        Duration::from_millis(self.long_wait_interval_ms)
    }

    pub fn broadcast_window(&self) -> Duration {
        Duration::from_millis(self.broadcast_window_ms)
    }
}

/// Top-level configuration for one diagnostic connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub timings: TpTimings,
}

impl DiagConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
