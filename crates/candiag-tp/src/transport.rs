//! Segmented transport state machine.
//!
//! One transport instance serves one client/server pair and owns exactly
//! one outbound and one inbound transfer state. It is pumped
//! cooperatively: the layer above calls [`MessageTransport::cycle`]
//! periodically, enqueues requests, and pops completed inbound services.
//!
//! Protocol anomalies (bad DLC, sequence mismatch, abandoned transfers,
//! queue overflow) abort at most the affected transfer and are reported
//! through the log, never by tearing the session down.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::address::{self, NodeId};
use crate::bus::{BusError, CanBus, ClientHandle};
use crate::config::TpTimings;
use crate::error::TpError;
use crate::frame::CanFrame;
use crate::pci::{
    self, Pdu, CONSECUTIVE_PAYLOAD, FIRST_FRAME_PAYLOAD, MAX_ISO_PAYLOAD, MAX_OMF_PAYLOAD,
    MAX_SINGLE_PAYLOAD,
};
use crate::service::Service;

/// Minimal contract the session layer drives.
pub trait MessageTransport: Send {
    /// Queue a request; the actual transmission happens inside `cycle`.
    fn enqueue_request(&mut self, service: Service) -> Result<(), TpError>;

    /// One cooperative step: pump the Tx and Rx state machines.
    ///
    /// Returns an error only for hard bus failures; per-transfer problems
    /// are logged and absorbed.
    fn cycle(&mut self) -> Result<(), TpError>;

    /// Pop one completed inbound service, if any.
    fn read_response(&mut self) -> Option<Service>;

    /// Re-derive addressing after the node identifiers changed and drop
    /// any in-flight state.
    fn reconfigure(&mut self, client: NodeId, server: NodeId) -> Result<(), TpError>;
}

enum TxTransfer {
    Idle,
    /// First Frame sent; waiting for the peer's Flow Control until the
    /// N_Bs deadline.
    WaitingForFlowControl {
        service: Service,
        offset: usize,
        deadline: Instant,
    },
    /// Consecutive frames still to flush (ISO after Flow Control, OMF
    /// immediately after its first frame).
    Sending {
        service: Service,
        offset: usize,
        sn: u8,
        omf: bool,
        deadline: Instant,
    },
}

enum RxTransfer {
    Idle,
    Receiving {
        buf: Vec<u8>,
        total: usize,
        expected_sn: u8,
        omf: bool,
        deadline: Instant,
    },
}

/// CAN transport for one client/server session.
pub struct CanTransport {
    bus: Arc<dyn CanBus>,
    handle: ClientHandle,
    tx_id: u32,
    timings: TpTimings,
    tx_queue: VecDeque<Service>,
    tx: TxTransfer,
    rx: RxTransfer,
    rx_done: VecDeque<Service>,
}

impl CanTransport {
    /// Register on the bus and install the response filter for the pair.
    pub fn new(
        bus: Arc<dyn CanBus>,
        client: NodeId,
        server: NodeId,
        timings: TpTimings,
    ) -> Result<Self, TpError> {
        let handle = bus.register_client();
        bus.set_receive_filter(handle, address::response_filter(client, server))
            .map_err(|e| TpError::Config(e.to_string()))?;
        debug!(%client, %server, tx_id = format!("0x{:08X}", address::request_id(client, server)), "transport registered");
        Ok(Self {
            bus,
            handle,
            tx_id: address::request_id(client, server),
            timings,
            tx_queue: VecDeque::new(),
            tx: TxTransfer::Idle,
            rx: RxTransfer::Idle,
            rx_done: VecDeque::new(),
        })
    }

    fn send_frame(&self, frame: &CanFrame) -> Result<bool, TpError> {
        match self.bus.send(frame) {
            Ok(()) => Ok(true),
            Err(BusError::TxQueueFull) => Ok(false),
            Err(e) => Err(TpError::SendFailed(e.to_string())),
        }
    }

    /// Begin transmitting the oldest queued request if Tx is idle.
    fn start_pending_tx(&mut self) -> Result<(), TpError> {
        if !matches!(self.tx, TxTransfer::Idle) {
            return Ok(());
        }
        let Some(service) = self.tx_queue.pop_front() else {
            return Ok(());
        };
        let len = service.len();

        if len <= MAX_SINGLE_PAYLOAD {
            let frame = pci::encode_single(self.tx_id, &service.data);
            if !self.send_frame(&frame)? {
                // driver queue full; retry on the next cycle
                self.tx_queue.push_front(service);
            }
            return Ok(());
        }

        if service.without_flow_control {
            let frame =
                pci::encode_omf_first(self.tx_id, len as u8, &service.data[..FIRST_FRAME_PAYLOAD]);
            if !self.send_frame(&frame)? {
                self.tx_queue.push_front(service);
                return Ok(());
            }
            let deadline = Instant::now() + self.timings.burst_deadline(len);
            self.tx = TxTransfer::Sending {
                service,
                offset: FIRST_FRAME_PAYLOAD,
                sn: 0,
                omf: true,
                deadline,
            };
            return Ok(());
        }

        let frame =
            pci::encode_first(self.tx_id, len as u16, &service.data[..FIRST_FRAME_PAYLOAD]);
        if !self.send_frame(&frame)? {
            self.tx_queue.push_front(service);
            return Ok(());
        }
        self.tx = TxTransfer::WaitingForFlowControl {
            service,
            offset: FIRST_FRAME_PAYLOAD,
            deadline: Instant::now() + self.timings.n_bs(),
        };
        Ok(())
    }

    /// Abandon transfers whose deadline elapsed.
    fn check_deadlines(&mut self) {
        let now = Instant::now();
        if let TxTransfer::WaitingForFlowControl { service, deadline, .. } = &self.tx {
            if now >= *deadline {
                warn!(
                    service = format!("0x{:02X}", service.id().unwrap_or(0)),
                    "no flow control within N_Bs, transfer abandoned"
                );
                self.tx = TxTransfer::Idle;
            }
        }
        if let TxTransfer::Sending { service, deadline, .. } = &self.tx {
            if now >= *deadline {
                warn!(
                    service = format!("0x{:02X}", service.id().unwrap_or(0)),
                    "consecutive frame burst deadline elapsed, transfer abandoned"
                );
                self.tx = TxTransfer::Idle;
            }
        }
        if let RxTransfer::Receiving { total, deadline, .. } = &self.rx {
            if now >= *deadline {
                warn!(total, "inbound reassembly timed out, transfer abandoned");
                self.rx = RxTransfer::Idle;
            }
        }
    }

    /// Flush as many consecutive frames as the driver accepts.
    ///
    /// A full send queue keeps the state (and position) for the next
    /// cycle; only the overall burst deadline gives up on the transfer.
    fn flush_consecutive(&mut self) -> Result<(), TpError> {
        let TxTransfer::Sending {
            service,
            mut offset,
            mut sn,
            omf,
            deadline,
        } = mem::replace(&mut self.tx, TxTransfer::Idle)
        else {
            return Ok(());
        };

        while offset < service.len() {
            let chunk_len = CONSECUTIVE_PAYLOAD.min(service.len() - offset);
            let chunk = &service.data[offset..offset + chunk_len];
            let frame = if omf {
                pci::encode_omf_consecutive(self.tx_id, sn, chunk)
            } else {
                pci::encode_consecutive(self.tx_id, sn, chunk)
            };
            if !self.send_frame(&frame)? {
                trace!(offset, "send queue full, consecutive frames deferred");
                self.tx = TxTransfer::Sending {
                    service,
                    offset,
                    sn,
                    omf,
                    deadline,
                };
                return Ok(());
            }
            offset += chunk_len;
            sn = (sn + 1) & 0x0F;
        }
        trace!(len = service.len(), "outbound transfer complete");
        Ok(())
    }

    fn drain_inbound(&mut self) -> Result<(), TpError> {
        self.bus.dispatch_incoming();
        while let Some(frame) = self.bus.read_from_queue(self.handle) {
            self.handle_frame(frame)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: CanFrame) -> Result<(), TpError> {
        match pci::decode(&frame) {
            Ok(Pdu::Single { payload }) => {
                self.push_completed(Service::new(payload));
            }
            Ok(Pdu::First { total_len, payload }) => {
                self.begin_rx(usize::from(total_len), &payload, false);
                // ISO transfers are acknowledged with one Flow Control
                // before consecutive frames are accepted.
                if !self.send_frame(&pci::encode_flow_control(self.tx_id))? {
                    warn!("send queue full, flow control dropped; peer will time out");
                }
            }
            Ok(Pdu::OmfFirst { total_len, payload }) => {
                self.begin_rx(usize::from(total_len), &payload, true);
            }
            Ok(Pdu::Consecutive { sn, payload }) => self.advance_rx(sn, &payload, false),
            Ok(Pdu::OmfConsecutive { sn, payload }) => self.advance_rx(sn, &payload, true),
            Ok(Pdu::FlowControl {
                flow_status,
                block_size,
                st_min,
            }) => self.handle_flow_control(flow_status, block_size, st_min),
            Err(e) => {
                warn!(
                    id = format!("0x{:08X}", frame.id),
                    dlc = frame.dlc,
                    error = %e,
                    "dropping malformed frame"
                );
            }
        }
        Ok(())
    }

    fn begin_rx(&mut self, total: usize, head: &[u8], omf: bool) {
        if let RxTransfer::Receiving { buf, total: old, .. } = &self.rx {
            // The wire gives no way to tell interleaved transfers from the
            // same peer apart; the older transfer is discarded on purpose.
            warn!(
                received = buf.len(),
                total = old,
                "first frame during reassembly, discarding older transfer"
            );
        }
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&head[..FIRST_FRAME_PAYLOAD.min(total)]);
        self.rx = RxTransfer::Receiving {
            buf,
            total,
            expected_sn: if omf { 0 } else { 1 },
            omf,
            deadline: Instant::now() + self.timings.rx_deadline(),
        };
    }

    fn advance_rx(&mut self, sn: u8, payload: &[u8], omf_frame: bool) {
        let RxTransfer::Receiving {
            mut buf,
            total,
            expected_sn,
            omf,
            deadline,
        } = mem::replace(&mut self.rx, RxTransfer::Idle)
        else {
            warn!(sn, "consecutive frame without transfer in progress");
            return;
        };

        if omf != omf_frame {
            warn!(sn, "frame kind does not match transfer in progress, abandoning");
            return;
        }
        if sn != expected_sn {
            let e = TpError::SequenceError {
                expected: expected_sn,
                got: sn,
            };
            warn!(error = %e, "inbound transfer abandoned");
            return;
        }

        let take = payload.len().min(total - buf.len());
        buf.extend_from_slice(&payload[..take]);
        if buf.len() == total {
            self.push_completed(Service::new(buf));
            return;
        }
        self.rx = RxTransfer::Receiving {
            buf,
            total,
            expected_sn: (sn + 1) & 0x0F,
            omf,
            deadline,
        };
    }

    fn handle_flow_control(&mut self, flow_status: u8, block_size: u8, st_min: u8) {
        // Inspect before taking the state: a stray FC (duplicate, or for
        // an already-abandoned transfer) must leave Tx untouched.
        if !matches!(self.tx, TxTransfer::WaitingForFlowControl { .. }) {
            warn!("unexpected flow control, ignored");
            return;
        }
        if flow_status != 0 || block_size != 0 || st_min != 0 {
            // Only BS=0/STmin=0 is supported; anything else is a protocol
            // error and must not advance the transfer.
            let e = TpError::Overflow;
            warn!(
                flow_status,
                block_size,
                st_min,
                error = %e,
                "unsupported flow control parameters"
            );
            return;
        }

        if let TxTransfer::WaitingForFlowControl { service, offset, .. } =
            mem::replace(&mut self.tx, TxTransfer::Idle)
        {
            let deadline = Instant::now() + self.timings.burst_deadline(service.len());
            self.tx = TxTransfer::Sending {
                service,
                offset,
                sn: 1,
                omf: false,
                deadline,
            };
        }
    }

    fn push_completed(&mut self, service: Service) {
        if self.rx_done.len() >= self.timings.rx_queue_depth {
            let e = TpError::Overflow;
            warn!(
                service = format!("0x{:02X}", service.id().unwrap_or(0)),
                error = %e,
                "receive queue full, completed service dropped"
            );
            return;
        }
        trace!(
            service = format!("0x{:02X}", service.id().unwrap_or(0)),
            payload = %hex::encode(&service.data),
            "service completed"
        );
        self.rx_done.push_back(service);
    }
}

impl MessageTransport for CanTransport {
    fn enqueue_request(&mut self, service: Service) -> Result<(), TpError> {
        if service.len() > MAX_ISO_PAYLOAD {
            return Err(TpError::Config(format!(
                "service of {} bytes exceeds the {MAX_ISO_PAYLOAD} byte transfer limit",
                service.len()
            )));
        }
        if service.without_flow_control && service.len() > MAX_OMF_PAYLOAD {
            return Err(TpError::Config(format!(
                "service of {} bytes exceeds the {MAX_OMF_PAYLOAD} byte OMF limit",
                service.len()
            )));
        }
        if self.tx_queue.len() >= self.timings.tx_queue_depth {
            return Err(TpError::Overflow);
        }
        self.tx_queue.push_back(service);
        Ok(())
    }

    fn cycle(&mut self) -> Result<(), TpError> {
        self.start_pending_tx()?;
        self.check_deadlines();
        self.flush_consecutive()?;
        self.drain_inbound()?;
        // a Flow Control received above may have unblocked the Tx side
        self.flush_consecutive()?;
        Ok(())
    }

    fn read_response(&mut self) -> Option<Service> {
        self.rx_done.pop_front()
    }

    fn reconfigure(&mut self, client: NodeId, server: NodeId) -> Result<(), TpError> {
        self.tx_id = address::request_id(client, server);
        self.bus
            .set_receive_filter(self.handle, address::response_filter(client, server))
            .map_err(|e| TpError::Config(e.to_string()))?;
        self.bus
            .clear_queue(self.handle)
            .map_err(|e| TpError::Config(e.to_string()))?;
        self.tx_queue.clear();
        self.tx = TxTransfer::Idle;
        self.rx = RxTransfer::Idle;
        self.rx_done.clear();
        debug!(%client, %server, "transport reconfigured");
        Ok(())
    }
}

impl Drop for CanTransport {
    fn drop(&mut self) {
        self.bus.remove_client(self.handle);
    }
}
