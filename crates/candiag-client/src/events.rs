//! Event sink for asynchronous traffic.

use candiag_tp::CanFrame;

use crate::datapool::DataPoolId;
use crate::nrc::NegativeResponseCode;

/// Receives traffic that does not belong to a synchronous request:
/// event-driven datapool values, tunnelled CAN frames, and the periodic
/// long-wait notification while a poll is in progress.
///
/// All methods default to no-ops so implementors only override what
/// they care about.
pub trait DiagnosticEvents: Send + Sync {
    /// An event-driven datapool value arrived.
    fn on_datapool_read(&self, _id: DataPoolId, _value: &[u8]) {}

    /// The server reported an error for an event-driven datapool read.
    fn on_datapool_read_error(&self, _id: DataPoolId, _nrc: NegativeResponseCode) {}

    /// A tunnelled CAN frame arrived.
    fn on_tunnel_frame(&self, _frame: &CanFrame) {}

    /// A synchronous wait has been running for another long-wait
    /// interval; hosts typically refresh a progress indication here.
    fn on_long_wait(&self) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvents;

impl DiagnosticEvents for NullEvents {}
