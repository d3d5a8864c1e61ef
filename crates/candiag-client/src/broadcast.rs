//! Bus-wide node discovery and configuration.
//!
//! Broadcast services bypass the session driver's point-to-point
//! request/response matching: responses come from many unknown senders,
//! so this client registers its own bus client with an "addressed to
//! me, any sender" filter and always exhausts the configured response
//! window instead of taking the first answer.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use candiag_tp::address;
use candiag_tp::bus::{BusError, CanBus, ClientHandle};
use candiag_tp::pci::{self, Pdu};
use candiag_tp::NodeId;

use crate::error::DiagError;
use crate::nrc::NegativeResponseCode;
use crate::records::{SerialNumber, MAX_EXTENDED_SERIAL_LEN};
use crate::services::{broadcast_id, service_id};

/// Client for the single-frame broadcast services.
pub struct BroadcastClient {
    bus: Arc<dyn CanBus>,
    handle: ClientHandle,
    tx_id: u32,
    window: Duration,
}

/// One positive answer collected during a response window.
type Answer = (u8, Vec<u8>);

impl BroadcastClient {
    /// Register on the bus with a filter accepting anything addressed
    /// to `client`, from any sender.
    pub fn new(
        bus: Arc<dyn CanBus>,
        client: NodeId,
        window: Duration,
    ) -> Result<Self, DiagError> {
        let handle = bus.register_client();
        bus.set_receive_filter(handle, address::broadcast_response_filter(client))
            .map_err(bus_error)?;
        Ok(Self {
            bus,
            handle,
            tx_id: address::broadcast_id(client),
            window,
        })
    }

    fn send(&self, payload: &[u8]) -> Result<(), DiagError> {
        self.bus
            .send(&pci::encode_single(self.tx_id, payload))
            .map_err(bus_error)
    }

    fn clear(&self) -> Result<(), DiagError> {
        self.bus.clear_queue(self.handle).map_err(bus_error)
    }

    /// Poll the inbound queue for the full window, collecting every
    /// single-frame response with its sender node id. The window is
    /// exhaustive because any number of nodes may answer.
    fn collect_window(&self) -> Vec<Answer> {
        let mut answers = Vec::new();
        let start = Instant::now();
        while start.elapsed() < self.window {
            self.bus.dispatch_incoming();
            while let Some(frame) = self.bus.read_from_queue(self.handle) {
                match pci::decode(&frame) {
                    Ok(Pdu::Single { payload }) => {
                        answers.push((address::responder_node(frame.id), payload));
                    }
                    Ok(_) => debug!(
                        id = format!("0x{:08X}", frame.id),
                        "segmented frame during broadcast window ignored"
                    ),
                    Err(e) => warn!(
                        id = format!("0x{:08X}", frame.id),
                        error = %e,
                        "malformed broadcast response dropped"
                    ),
                }
            }
            thread::yield_now();
        }
        answers
    }

    /// Discover nodes by standard serial number. Any number of
    /// positive responses is accepted; negatives are logged.
    pub fn read_serial_numbers(&self) -> Result<Vec<(u8, SerialNumber)>, DiagError> {
        self.clear()?;
        self.send(&[broadcast_id::READ_SERIAL_NUMBER])?;

        let mut found = Vec::new();
        for (node, payload) in self.collect_window() {
            match payload.as_slice() {
                [sid, serial @ ..]
                    if *sid == broadcast_id::READ_SERIAL_NUMBER | service_id::RESPONSE_FLAG
                        && serial.len() == 6 =>
                {
                    let mut bytes = [0u8; 6];
                    bytes.copy_from_slice(serial);
                    found.push((node, SerialNumber::standard(bytes)));
                }
                [service_id::NEGATIVE_RESPONSE, broadcast_id::READ_SERIAL_NUMBER, nrc, ..] => {
                    warn!(
                        node,
                        nrc = %NegativeResponseCode::from(*nrc),
                        "node rejected serial number discovery"
                    );
                }
                _ => debug!(node, len = payload.len(), "unrelated broadcast traffic ignored"),
            }
        }
        info!(count = found.len(), "serial number discovery finished");
        Ok(found)
    }

    /// Assign a new node identifier to the node carrying `serial`.
    ///
    /// A multi-part request: two single frames sent back-to-back, a
    /// response awaited only after the last part. Exactly one positive
    /// response is the success case; more than one means duplicate
    /// serial numbers on the bus, a real fault.
    pub fn set_node_id_by_serial_number(
        &self,
        serial: &[u8; 6],
        new_id: NodeId,
    ) -> Result<u8, DiagError> {
        self.clear()?;
        let mut part1 = vec![broadcast_id::SET_NODE_ID_BY_SERIAL_NUMBER, 0x01];
        part1.extend_from_slice(&serial[..5]);
        self.send(&part1)?;
        self.send(&[
            broadcast_id::SET_NODE_ID_BY_SERIAL_NUMBER,
            0x02,
            serial[5],
            new_id.bus(),
            new_id.node(),
        ])?;

        let mut positives = Vec::new();
        let mut negative = None;
        for (node, payload) in self.collect_window() {
            match payload.as_slice() {
                [sid, bus, node_id]
                    if *sid
                        == broadcast_id::SET_NODE_ID_BY_SERIAL_NUMBER
                            | service_id::RESPONSE_FLAG
                        && *bus == new_id.bus()
                        && *node_id == new_id.node() =>
                {
                    positives.push(node);
                }
                [service_id::NEGATIVE_RESPONSE, broadcast_id::SET_NODE_ID_BY_SERIAL_NUMBER, nrc, ..] =>
                {
                    let nrc = NegativeResponseCode::from(*nrc);
                    warn!(node, %nrc, "node rejected id assignment");
                    negative.get_or_insert(nrc);
                }
                _ => debug!(node, len = payload.len(), "unrelated broadcast traffic ignored"),
            }
        }

        if positives.len() > 1 {
            return Err(DiagError::DuplicateResponders(positives));
        }
        match positives.first() {
            Some(&node) => {
                info!(node, %new_id, "node id assigned");
                Ok(node)
            }
            None => match negative {
                Some(nrc) => Err(DiagError::NegativeResponse {
                    service: broadcast_id::SET_NODE_ID_BY_SERIAL_NUMBER,
                    nrc,
                }),
                None => Err(DiagError::Timeout),
            },
        }
    }

    /// Ask all nodes to accept programming; returns the nodes that
    /// confirmed.
    pub fn request_programming(&self) -> Result<Vec<u8>, DiagError> {
        self.clear()?;
        self.send(&[broadcast_id::REQUEST_PROGRAMMING])?;

        let mut confirmed = Vec::new();
        for (node, payload) in self.collect_window() {
            match payload.as_slice() {
                [sid] if *sid == broadcast_id::REQUEST_PROGRAMMING | service_id::RESPONSE_FLAG => {
                    confirmed.push(node);
                }
                [service_id::NEGATIVE_RESPONSE, broadcast_id::REQUEST_PROGRAMMING, nrc, ..] => {
                    warn!(
                        node,
                        nrc = %NegativeResponseCode::from(*nrc),
                        "node rejected programming request"
                    );
                }
                _ => debug!(node, len = payload.len(), "unrelated broadcast traffic ignored"),
            }
        }
        Ok(confirmed)
    }

    /// Reset every node on the bus. Fire-and-forget.
    pub fn ecu_reset(&self, reset_type: u8) -> Result<(), DiagError> {
        self.send(&[broadcast_id::ECU_RESET, reset_type])
    }

    /// Move all nodes to the default session. Fire-and-forget.
    pub fn enter_default_session(&self) -> Result<(), DiagError> {
        self.send(&[broadcast_id::ENTER_DEFAULT_SESSION])
    }

    /// Move all nodes to the pre-programming session. Fire-and-forget.
    pub fn enter_preprogramming_session(&self) -> Result<(), DiagError> {
        self.send(&[broadcast_id::ENTER_PREPROGRAMMING_SESSION])
    }

    /// Discover nodes by extended (variable-length) serial number.
    ///
    /// Each node answers with a sequence of 2-byte blocks tagged with a
    /// server-generated unique id, so interleaved responses from
    /// different senders can be told apart: block 0 carries flags and
    /// format, block 1 the declared character count, later blocks up to
    /// two characters each. A record is emitted once its declared
    /// length is satisfied.
    pub fn read_serial_numbers_extended(&self) -> Result<Vec<(u8, SerialNumber)>, DiagError> {
        self.clear()?;
        self.send(&[broadcast_id::READ_SERIAL_NUMBER_EXTENDED])?;

        let mut records: HashMap<u8, ExtendedRecord> = HashMap::new();
        let start = Instant::now();
        while start.elapsed() < self.window {
            self.bus.dispatch_incoming();
            while let Some(frame) = self.bus.read_from_queue(self.handle) {
                let Ok(Pdu::Single { payload }) = pci::decode(&frame) else {
                    continue;
                };
                let node = address::responder_node(frame.id);
                match payload.as_slice() {
                    [sid, unique_id, block, b0, b1]
                        if *sid
                            == broadcast_id::READ_SERIAL_NUMBER_EXTENDED
                                | service_id::RESPONSE_FLAG =>
                    {
                        records
                            .entry(*unique_id)
                            .or_insert_with(|| ExtendedRecord::new(node))
                            .apply(*block, *b0, *b1);
                    }
                    [service_id::NEGATIVE_RESPONSE, broadcast_id::READ_SERIAL_NUMBER_EXTENDED, nrc, ..] =>
                    {
                        warn!(
                            node,
                            nrc = %NegativeResponseCode::from(*nrc),
                            "node rejected extended serial discovery"
                        );
                    }
                    _ => debug!(node, len = payload.len(), "unrelated broadcast traffic ignored"),
                }
            }
            thread::yield_now();
        }

        let mut found = Vec::new();
        for (unique_id, record) in records {
            match record.finish() {
                Some(serial) => found.push((record.node, serial)),
                None => warn!(
                    unique_id,
                    node = record.node,
                    "incomplete extended serial record discarded"
                ),
            }
        }
        info!(count = found.len(), "extended serial number discovery finished");
        Ok(found)
    }
}

impl Drop for BroadcastClient {
    fn drop(&mut self) {
        self.bus.remove_client(self.handle);
    }
}

fn bus_error(e: BusError) -> DiagError {
    match e {
        BusError::TxQueueFull => DiagError::QueueOverflow,
        other => DiagError::CommunicationFailure(other.to_string()),
    }
}

/// Accumulates one sender's extended serial number across blocks.
///
/// Character blocks are placed by their block number, so a retransmitted
/// frame overwrites its own slot instead of shifting later characters.
struct ExtendedRecord {
    node: u8,
    declared_len: Option<usize>,
    chars: Vec<u8>,
    blocks_seen: u32,
}

impl ExtendedRecord {
    fn new(node: u8) -> Self {
        Self {
            node,
            declared_len: None,
            chars: Vec::new(),
            blocks_seen: 0,
        }
    }

    fn apply(&mut self, block: u8, b0: u8, b1: u8) {
        match block {
            // flags and format; nothing in them affects reassembly
            0 => {}
            1 => {
                let len = usize::from(b0);
                if (1..=MAX_EXTENDED_SERIAL_LEN).contains(&len) {
                    self.declared_len = Some(len);
                } else {
                    warn!(node = self.node, len, "extended serial length out of range");
                }
            }
            _ => {
                let index = usize::from(block) - 2;
                if index >= (MAX_EXTENDED_SERIAL_LEN + 1) / 2 {
                    warn!(node = self.node, block, "extended serial block out of range");
                    return;
                }
                if self.chars.len() < (index + 1) * 2 {
                    self.chars.resize((index + 1) * 2, 0);
                }
                self.chars[index * 2] = b0;
                self.chars[index * 2 + 1] = b1;
                self.blocks_seen |= 1 << index;
            }
        }
    }

    fn finish(&self) -> Option<SerialNumber> {
        let len = self.declared_len?;
        let needed = (len + 1) / 2;
        let wanted = (1u32 << needed) - 1;
        if self.blocks_seen & wanted != wanted {
            return None;
        }
        let text = String::from_utf8(self.chars[..len].to_vec()).ok()?;
        SerialNumber::extended(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_record_assembles_in_block_order() {
        let mut rec = ExtendedRecord::new(9);
        rec.apply(0, 0x00, 0x01);
        rec.apply(1, 5, 0);
        rec.apply(2, b'A', b'B');
        rec.apply(3, b'C', b'D');
        assert!(rec.finish().is_none(), "one character still missing");
        rec.apply(4, b'E', 0);
        assert_eq!(
            rec.finish(),
            Some(SerialNumber::Extended("ABCDE".into()))
        );
    }

    #[test]
    fn retransmitted_blocks_do_not_shift_characters() {
        let mut rec = ExtendedRecord::new(9);
        rec.apply(1, 4, 0);
        rec.apply(2, b'W', b'X');
        rec.apply(2, b'W', b'X'); // CAN-level retransmission
        rec.apply(3, b'Y', b'Z');
        assert_eq!(rec.finish(), Some(SerialNumber::Extended("WXYZ".into())));
    }

    #[test]
    fn out_of_order_blocks_land_in_their_slots() {
        let mut rec = ExtendedRecord::new(9);
        rec.apply(3, b'C', b'D');
        rec.apply(1, 4, 0);
        assert!(rec.finish().is_none(), "block 2 still missing");
        rec.apply(2, b'A', b'B');
        assert_eq!(rec.finish(), Some(SerialNumber::Extended("ABCD".into())));
    }

    #[test]
    fn extended_record_rejects_bad_declared_length() {
        let mut rec = ExtendedRecord::new(3);
        rec.apply(1, 0, 0);
        rec.apply(2, b'x', b'y');
        assert!(rec.finish().is_none());
    }
}
