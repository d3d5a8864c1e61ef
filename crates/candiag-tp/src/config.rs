//! Transport timing and queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the segmentation state machine.
///
/// The consecutive-frame burst deadline follows a bitrate-independent
/// heuristic (`payload / 7` frames times a per-frame budget, with a
/// floor). The heuristic is not protocol-mandated, so both knobs are
/// configuration rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpTimings {
    /// Timeout waiting for Flow Control after a First Frame (N_Bs), ms.
    #[serde(default = "default_n_bs_ms")]
    pub n_bs_ms: u64,
    /// Per consecutive frame share of the burst deadline, ms.
    #[serde(default = "default_burst_ms_per_frame")]
    pub burst_ms_per_frame: u64,
    /// Lower bound of the burst deadline, ms.
    #[serde(default = "default_burst_floor_ms")]
    pub burst_floor_ms: u64,
    /// Deadline for completing one inbound reassembly, ms.
    #[serde(default = "default_rx_deadline_ms")]
    pub rx_deadline_ms: u64,
    /// Completed inbound services held for the layer above.
    #[serde(default = "default_rx_queue_depth")]
    pub rx_queue_depth: usize,
    /// Requests accepted before transmission.
    #[serde(default = "default_tx_queue_depth")]
    pub tx_queue_depth: usize,
}

fn default_n_bs_ms() -> u64 {
    1000
}

fn default_burst_ms_per_frame() -> u64 {
    2
}

fn default_burst_floor_ms() -> u64 {
    100
}

fn default_rx_deadline_ms() -> u64 {
    1000
}

fn default_rx_queue_depth() -> usize {
    64
}

fn default_tx_queue_depth() -> usize {
    64
}

impl Default for TpTimings {
    fn default() -> Self {
        Self {
            n_bs_ms: default_n_bs_ms(),
            burst_ms_per_frame: default_burst_ms_per_frame(),
            burst_floor_ms: default_burst_floor_ms(),
            rx_deadline_ms: default_rx_deadline_ms(),
            rx_queue_depth: default_rx_queue_depth(),
            tx_queue_depth: default_tx_queue_depth(),
        }
    }
}

impl TpTimings {
    /// Deadline for flushing the consecutive frames of a transfer.
    pub fn burst_deadline(&self, payload_len: usize) -> Duration {
        let frames = payload_len as u64 / 7;
        Duration::from_millis((frames * self.burst_ms_per_frame).max(self.burst_floor_ms))
    }

    pub fn n_bs(&self) -> Duration {
        Duration::from_millis(self.n_bs_ms)
    }

    pub fn rx_deadline(&self) -> Duration {
        Duration::from_millis(self.rx_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_deadline_has_a_floor() {
        let t = TpTimings::default();
        assert_eq!(t.burst_deadline(20), Duration::from_millis(100));
        assert_eq!(t.burst_deadline(4095), Duration::from_millis(1170));
    }

    #[test]
    fn defaults_survive_empty_toml() {
        let t: TpTimings = toml::from_str("").unwrap();
        assert_eq!(t.n_bs_ms, 1000);
        assert_eq!(t.rx_queue_depth, 64);
    }
}
