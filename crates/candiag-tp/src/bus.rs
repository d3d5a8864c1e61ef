//! External CAN queue interface.
//!
//! The physical (or virtual) CAN adapter is not part of this crate. It is
//! consumed through [`CanBus`]: a shared dispatcher that fans received
//! frames out to registered logical clients, each with its own receive
//! filter and queue. Several protocol stacks may share one bus this way;
//! the transport never assumes exclusive access.

use thiserror::Error;

use crate::frame::CanFrame;

/// Errors reported by a [`CanBus`] implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The driver's send queue is full; the caller may retry later.
    #[error("send queue full")]
    TxQueueFull,

    /// The bus or adapter is gone; not recoverable by retrying.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// Operation on a handle that was never registered (or was removed).
    #[error("unknown client handle")]
    UnknownClient,
}

/// Opaque handle identifying one logical client on a shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(pub u32);

/// Receive filter for one client.
///
/// A frame is queued for the client when `(frame.id & mask) == (match_id & mask)`
/// and, if `extended_only` is set, the frame carries a 29-bit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveFilter {
    pub match_id: u32,
    pub mask: u32,
    pub extended_only: bool,
}

/// Shared CAN queue contract.
///
/// `dispatch_incoming` pulls frames from the underlying adapter into the
/// per-client queues; `read_from_queue` then pops one frame for a given
/// client. Implementations must be callable from multiple threads.
pub trait CanBus: Send + Sync {
    /// Register a new logical client. The client receives nothing until a
    /// filter is installed.
    fn register_client(&self) -> ClientHandle;

    /// Remove a client and drop its queue.
    fn remove_client(&self, handle: ClientHandle);

    /// Install (or replace) the receive filter for a client.
    fn set_receive_filter(
        &self,
        handle: ClientHandle,
        filter: ReceiveFilter,
    ) -> Result<(), BusError>;

    /// Discard all frames queued for a client.
    fn clear_queue(&self, handle: ClientHandle) -> Result<(), BusError>;

    /// Hand one frame to the driver for transmission.
    fn send(&self, frame: &CanFrame) -> Result<(), BusError>;

    /// Move frames from the adapter into the per-client queues.
    fn dispatch_incoming(&self);

    /// Pop one queued frame for a client, if any.
    fn read_from_queue(&self, handle: ClientHandle) -> Option<CanFrame>;
}

impl ReceiveFilter {
    /// Whether a frame passes this filter.
    pub fn matches(&self, frame: &CanFrame) -> bool {
        if self.extended_only && !frame.extended {
            return false;
        }
        (frame.id & self.mask) == (self.match_id & self.mask)
    }
}
