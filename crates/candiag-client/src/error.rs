//! Session-layer error taxonomy.

use thiserror::Error;

use candiag_tp::TpError;

use crate::nrc::NegativeResponseCode;

/// Result of a diagnostic operation.
///
/// Individual service calls fail with a specific, recoverable error;
/// the connection itself is never torn down by a failed call, only by
/// an explicit disconnect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiagError {
    /// No transport installed; caller error, not retried.
    #[error("no transport configured")]
    NotConfigured,

    /// No matching response within the polling/broadcast window.
    #[error("response timeout")]
    Timeout,

    /// The transport itself reported a hard failure.
    #[error("communication failure: {0}")]
    CommunicationFailure(String),

    /// The server actively rejected the request.
    #[error("negative response: {nrc} (0x{nrc:02X}) for service 0x{service:02X}")]
    NegativeResponse {
        service: u8,
        nrc: NegativeResponseCode,
    },

    /// Positive response whose echoed fields or size do not match the
    /// request; indicates a protocol or server bug.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Caller-supplied identifier/address/size violates a documented
    /// limit; rejected before any I/O.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// An internal bounded queue was full; the offending item was
    /// dropped and logged.
    #[error("queue overflow")]
    QueueOverflow,

    /// A consecutive frame's sequence number did not match expectation.
    #[error("frame sequence error")]
    SequenceError,

    /// More than one node answered a broadcast expecting exactly one
    /// responder; carries the node ids that answered.
    #[error("duplicate responders on the bus: {0:?}")]
    DuplicateResponders(Vec<u8>),
}

impl From<TpError> for DiagError {
    fn from(e: TpError) -> Self {
        match e {
            TpError::Config(msg) => DiagError::OutOfRange(msg),
            TpError::Overflow => DiagError::QueueOverflow,
            TpError::SequenceError { .. } => DiagError::SequenceError,
            TpError::SendFailed(msg) => DiagError::CommunicationFailure(msg),
        }
    }
}
