//! Raw CAN frame type shared across the stack.

/// A classic CAN 2.0 frame as exchanged with the bus driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    /// Arbitration id (29-bit when `extended` is set, 11-bit otherwise).
    pub id: u32,
    /// Extended (29-bit) identifier flag.
    pub extended: bool,
    /// Remote transmission request flag.
    pub rtr: bool,
    /// Number of valid bytes in `data` (0..=8).
    pub dlc: u8,
    /// Frame payload; only the first `dlc` bytes are meaningful.
    pub data: [u8; 8],
    /// Receive timestamp in microseconds (0 for frames built locally).
    pub timestamp_us: u64,
}

impl CanFrame {
    /// Build an extended-id data frame from a payload of at most 8 bytes.
    pub fn extended(id: u32, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= 8);
        let n = payload.len().min(8);
        let mut data = [0u8; 8];
        data[..n].copy_from_slice(&payload[..n]);
        Self {
            id,
            extended: true,
            rtr: false,
            dlc: n as u8,
            data,
            timestamp_us: 0,
        }
    }

    /// The valid bytes of the frame.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc.min(8))]
    }
}
