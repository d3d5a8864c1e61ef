//! Application-layer service payloads.

/// One application-layer message: the service id in byte 0 (high bit set
/// on responses) followed by service-specific data.
///
/// A service is owned exclusively by whichever layer currently holds it:
/// queued for transmission, in-flight in a transfer state, or dequeued
/// from the receive queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Service {
    /// Raw payload bytes.
    pub data: Vec<u8>,
    /// Transfer without the flow-control round trip (OMF). Only used for
    /// a handful of large-but-bounded bulk payloads.
    pub without_flow_control: bool,
}

impl Service {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            without_flow_control: false,
        }
    }

    /// A service flagged for the unacknowledged multi-frame transfer.
    pub fn without_flow_control(data: Vec<u8>) -> Self {
        Self {
            data,
            without_flow_control: true,
        }
    }

    /// Service id, if the payload is non-empty.
    pub fn id(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
