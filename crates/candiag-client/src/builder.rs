//! Typed request construction.

use candiag_tp::Service;

/// Builds a request payload by appending big-endian integers and byte
/// slices, tracking the length automatically.
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    data: Vec<u8>,
    without_flow_control: bool,
}

impl ServiceBuilder {
    /// Start a request with the given service id as byte 0.
    pub fn new(service_id: u8) -> Self {
        Self {
            data: vec![service_id],
            without_flow_control: false,
        }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.data.push(v);
        self
    }

    pub fn u16_be(mut self, v: u16) -> Self {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32_be(mut self, v: u32) -> Self {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Append `v` big-endian using the minimum number of bytes (1..=4).
    pub fn min_width_be(mut self, v: u32) -> Self {
        let width = min_width(v);
        self.data.extend_from_slice(&v.to_be_bytes()[4 - width..]);
        self
    }

    pub fn bytes(mut self, v: &[u8]) -> Self {
        self.data.extend_from_slice(v);
        self
    }

    /// Flag the request for the unacknowledged multi-frame transfer.
    pub fn without_flow_control(mut self) -> Self {
        self.without_flow_control = true;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn build(self) -> Service {
        Service {
            data: self.data,
            without_flow_control: self.without_flow_control,
        }
    }
}

/// Minimum number of big-endian bytes needed to represent `v` (1..=4).
pub fn min_width(v: u32) -> usize {
    match v {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}
