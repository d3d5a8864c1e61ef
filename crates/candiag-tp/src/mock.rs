//! In-memory loopback bus for tests and simulation.
//!
//! Every frame sent by any client lands on a shared wire;
//! `dispatch_incoming` fans it out to all clients whose filter matches.
//! Test hooks allow simulating a full driver send queue.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::trace;

use crate::bus::{BusError, CanBus, ClientHandle, ReceiveFilter};
use crate::frame::CanFrame;

const CLIENT_QUEUE_DEPTH: usize = 512;

#[derive(Default)]
struct Client {
    filter: Option<ReceiveFilter>,
    queue: VecDeque<CanFrame>,
}

#[derive(Default)]
struct Inner {
    next_handle: u32,
    clients: HashMap<u32, Client>,
    wire: VecDeque<CanFrame>,
    clock_us: u64,
    /// Number of upcoming sends to reject with `TxQueueFull`.
    fail_sends: usize,
}

/// Software loopback implementing [`CanBus`].
#[derive(Default)]
pub struct MockBus {
    inner: Mutex<Inner>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `send` fail with a full send queue.
    pub fn fail_next_sends(&self, n: usize) {
        self.inner.lock().fail_sends = n;
    }
}

impl CanBus for MockBus {
    fn register_client(&self) -> ClientHandle {
        let mut inner = self.inner.lock();
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.clients.insert(handle, Client::default());
        ClientHandle(handle)
    }

    fn remove_client(&self, handle: ClientHandle) {
        self.inner.lock().clients.remove(&handle.0);
    }

    fn set_receive_filter(
        &self,
        handle: ClientHandle,
        filter: ReceiveFilter,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        let client = inner
            .clients
            .get_mut(&handle.0)
            .ok_or(BusError::UnknownClient)?;
        client.filter = Some(filter);
        Ok(())
    }

    fn clear_queue(&self, handle: ClientHandle) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        let client = inner
            .clients
            .get_mut(&handle.0)
            .ok_or(BusError::UnknownClient)?;
        client.queue.clear();
        Ok(())
    }

    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(BusError::TxQueueFull);
        }
        inner.clock_us += 1;
        let mut stamped = *frame;
        stamped.timestamp_us = inner.clock_us;
        trace!(id = format!("0x{:08X}", frame.id), dlc = frame.dlc, "wire");
        inner.wire.push_back(stamped);
        Ok(())
    }

    fn dispatch_incoming(&self) {
        let mut inner = self.inner.lock();
        while let Some(frame) = inner.wire.pop_front() {
            for client in inner.clients.values_mut() {
                let matches = client.filter.map(|f| f.matches(&frame)).unwrap_or(false);
                if matches && client.queue.len() < CLIENT_QUEUE_DEPTH {
                    client.queue.push_back(frame);
                }
            }
        }
    }

    fn read_from_queue(&self, handle: ClientHandle) -> Option<CanFrame> {
        let mut inner = self.inner.lock();
        inner.clients.get_mut(&handle.0)?.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_fanned_out_by_filter() {
        let bus = MockBus::new();
        let a = bus.register_client();
        let b = bus.register_client();
        bus.set_receive_filter(
            a,
            ReceiveFilter {
                match_id: 0x18DA_0509,
                mask: 0x1FFF_FFFF,
                extended_only: true,
            },
        )
        .unwrap();
        bus.set_receive_filter(
            b,
            ReceiveFilter {
                match_id: 0x18DA_0905,
                mask: 0x1FFF_FFFF,
                extended_only: true,
            },
        )
        .unwrap();

        bus.send(&CanFrame::extended(0x18DA_0509, &[0x01])).unwrap();
        bus.dispatch_incoming();

        assert!(bus.read_from_queue(a).is_some());
        assert!(bus.read_from_queue(b).is_none());
    }

    #[test]
    fn failed_sends_are_injectable() {
        let bus = MockBus::new();
        bus.fail_next_sends(1);
        let frame = CanFrame::extended(0x100, &[]);
        assert_eq!(bus.send(&frame), Err(BusError::TxQueueFull));
        assert_eq!(bus.send(&frame), Ok(()));
    }

    #[test]
    fn clear_queue_discards_pending_frames() {
        let bus = MockBus::new();
        let a = bus.register_client();
        bus.set_receive_filter(
            a,
            ReceiveFilter {
                match_id: 0,
                mask: 0,
                extended_only: false,
            },
        )
        .unwrap();
        bus.send(&CanFrame::extended(0x100, &[])).unwrap();
        bus.dispatch_incoming();
        bus.clear_queue(a).unwrap();
        assert!(bus.read_from_queue(a).is_none());
    }
}
