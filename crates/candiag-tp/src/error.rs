//! Transport-level protocol errors.

use thiserror::Error;

/// Errors raised inside the segmentation layer.
///
/// Most of these abort at most the single in-progress transfer and are
/// logged by the transport rather than returned; only hard bus failures
/// propagate out of `cycle`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TpError {
    /// Invalid configuration or a malformed frame (bad DLC, bad length).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A bounded queue was full, or a flow control frame demanded
    /// pacing this implementation does not support.
    #[error("queue overflow")]
    Overflow,

    /// A consecutive frame arrived with an unexpected sequence number.
    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceError { expected: u8, got: u8 },

    /// The bus itself failed; not recoverable by the transport.
    #[error("send failed: {0}")]
    SendFailed(String),
}
