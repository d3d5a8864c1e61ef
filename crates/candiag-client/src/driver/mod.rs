//! Diagnostic session driver: polling, matching, async dispatch.
//!
//! The driver owns one point-to-point connection. Synchronous service
//! calls enqueue a request and then pump the transport until the
//! matching response arrives or the poll deadline passes; everything
//! else the server sends in the meantime (event-driven datapool values,
//! tunnelled frames) is routed to the [`DiagnosticEvents`] sink.
//!
//! Concurrency follows a best-effort arbiter: `cycle` uses `try_lock`
//! and returns immediately when another caller is already pumping,
//! while a synchronous wait holds the lock for its whole duration.
//! At most one "who owns this response" decision runs at a time, so a
//! waiter's response cannot be stolen by a concurrent async-only pump.

mod services;

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use candiag_tp::address::EXTENDED_ID_MASK;
use candiag_tp::{CanFrame, MessageTransport, NodeId, Service};

use crate::config::SessionSettings;
use crate::datapool::DataPoolId;
use crate::error::DiagError;
use crate::events::DiagnosticEvents;
use crate::nrc::NegativeResponseCode;
use crate::services::service_id;

/// How the size of an awaited positive response is checked.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SizePolicy {
    Exact(usize),
    AtLeast(usize),
}

/// Shape of the response a synchronous caller is waiting for.
///
/// Responses not matching the shape are not errors: they are handed to
/// the async dispatcher, because they may be in-flight events of the
/// same service family. The optional echo checks compare identifying
/// request bytes so overlapping traffic (same service id, different
/// datapool element or data identifier) is told apart.
pub(crate) struct Expected {
    service: u8,
    size: SizePolicy,
    positive_echo: Option<(usize, Vec<u8>)>,
    negative_echo: Option<(usize, Vec<u8>)>,
}

impl Expected {
    pub(crate) fn exact(service: u8, len: usize) -> Self {
        Self {
            service,
            size: SizePolicy::Exact(len),
            positive_echo: None,
            negative_echo: None,
        }
    }

    pub(crate) fn at_least(service: u8, len: usize) -> Self {
        Self {
            service,
            size: SizePolicy::AtLeast(len),
            positive_echo: None,
            negative_echo: None,
        }
    }

    /// Positive responses must carry `bytes` at `offset`.
    pub(crate) fn with_positive_echo(mut self, offset: usize, bytes: Vec<u8>) -> Self {
        self.positive_echo = Some((offset, bytes));
        self
    }

    /// Negative responses must carry `bytes` at `offset` to count as
    /// the rejection of this request.
    pub(crate) fn with_negative_echo(mut self, offset: usize, bytes: Vec<u8>) -> Self {
        self.negative_echo = Some((offset, bytes));
        self
    }

    fn matches(&self, data: &[u8]) -> Option<Polled> {
        if data.first() == Some(&service_id::NEGATIVE_RESPONSE) {
            if data.len() < 3 || data[1] != self.service {
                return None;
            }
            if let Some((offset, bytes)) = &self.negative_echo {
                if data.len() < offset + bytes.len()
                    || &data[*offset..offset + bytes.len()] != bytes.as_slice()
                {
                    return None;
                }
            }
            return Some(Polled::Negative(NegativeResponseCode::from(data[2])));
        }

        if data.first() != Some(&(self.service | service_id::RESPONSE_FLAG)) {
            return None;
        }
        let size_ok = match self.size {
            SizePolicy::Exact(n) => data.len() == n,
            SizePolicy::AtLeast(n) => data.len() >= n,
        };
        if !size_ok {
            return None;
        }
        if let Some((offset, bytes)) = &self.positive_echo {
            if data.len() < offset + bytes.len()
                || &data[*offset..offset + bytes.len()] != bytes.as_slice()
            {
                return None;
            }
        }
        Some(Polled::Positive(data.to_vec()))
    }
}

enum Polled {
    Positive(Vec<u8>),
    Negative(NegativeResponseCode),
}

struct DriverInner {
    transport: Option<Box<dyn MessageTransport>>,
    client: NodeId,
    server: NodeId,
}

/// One diagnostic connection to one server node.
pub struct SessionDriver {
    inner: Mutex<DriverInner>,
    settings: SessionSettings,
    events: Arc<dyn DiagnosticEvents>,
}

impl SessionDriver {
    pub fn new(
        client: NodeId,
        server: NodeId,
        settings: SessionSettings,
        events: Arc<dyn DiagnosticEvents>,
    ) -> Self {
        Self {
            inner: Mutex::new(DriverInner {
                transport: None,
                client,
                server,
            }),
            settings,
            events,
        }
    }

    /// Install the transport; service calls fail with
    /// [`DiagError::NotConfigured`] until this has been done.
    pub fn connect(&self, transport: Box<dyn MessageTransport>) {
        let mut inner = self.inner.lock();
        inner.transport = Some(transport);
        debug!(client = %inner.client, server = %inner.server, "session connected");
    }

    /// Re-derive addressing after node identifiers changed; drops any
    /// in-flight transfers and queued responses.
    pub fn reconnect(&self, client: NodeId, server: NodeId) -> Result<(), DiagError> {
        let mut inner = self.inner.lock();
        let tp = inner.transport.as_mut().ok_or(DiagError::NotConfigured)?;
        tp.reconfigure(client, server)?;
        inner.client = client;
        inner.server = server;
        debug!(%client, %server, "session reconnected");
        Ok(())
    }

    /// Drop the transport. The only way a connection ends.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.transport = None;
        debug!(client = %inner.client, server = %inner.server, "session disconnected");
    }

    /// Own and peer node identifiers.
    pub fn nodes(&self) -> (NodeId, NodeId) {
        let inner = self.inner.lock();
        (inner.client, inner.server)
    }

    /// Cooperative pump: advance the transport and dispatch everything
    /// it completed as async traffic.
    ///
    /// A no-op when another caller already holds the driver (it is
    /// pumping on our behalf).
    pub fn cycle(&self) -> Result<(), DiagError> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Ok(());
        };
        self.cycle_inner(&mut inner, None).map(|_| ())
    }

    fn cycle_inner(
        &self,
        inner: &mut DriverInner,
        expected: Option<&Expected>,
    ) -> Result<Option<Polled>, DiagError> {
        let tp = inner.transport.as_mut().ok_or(DiagError::NotConfigured)?;
        tp.cycle()
            .map_err(|e| DiagError::CommunicationFailure(e.to_string()))?;

        let mut found = None;
        while let Some(resp) = tp.read_response() {
            if found.is_none() {
                if let Some(exp) = expected {
                    if let Some(polled) = exp.matches(&resp.data) {
                        found = Some(polled);
                        continue;
                    }
                }
            }
            self.dispatch_async(resp);
        }
        Ok(found)
    }

    /// Route one response that no synchronous caller claimed.
    fn dispatch_async(&self, resp: Service) {
        let data = &resp.data;
        match data.first().copied() {
            Some(sid)
                if sid == service_id::DATA_POOL_READ | service_id::RESPONSE_FLAG
                    && data.len() >= 4 =>
            {
                match DataPoolId::unpack([data[1], data[2], data[3]]) {
                    Ok(id) => self.events.on_datapool_read(id, &data[4..]),
                    Err(e) => warn!(error = %e, "event datapool id invalid, value dropped"),
                }
            }
            Some(sid)
                if sid == service_id::NEGATIVE_RESPONSE
                    && data.len() >= 6
                    && data[1] == service_id::DATA_POOL_READ =>
            {
                let nrc = NegativeResponseCode::from(data[2]);
                match DataPoolId::unpack([data[3], data[4], data[5]]) {
                    Ok(id) => self.events.on_datapool_read_error(id, nrc),
                    Err(e) => warn!(error = %e, "event datapool error id invalid, dropped"),
                }
            }
            Some(sid) if sid == service_id::CAN_TUNNEL | service_id::RESPONSE_FLAG => {
                match decode_tunnel_frame(&data[1..]) {
                    Some(frame) => self.events.on_tunnel_frame(&frame),
                    None => warn!(len = data.len(), "malformed tunnel frame dropped"),
                }
            }
            Some(sid) => {
                debug!(
                    service = format!("0x{:02X}", sid),
                    payload = %hex::encode(data),
                    "unmatched response dropped"
                );
            }
            None => debug!("empty response dropped"),
        }
    }

    /// Enqueue a request and wait for the matching response.
    ///
    /// Holds the driver for the whole wait; deadline checks use
    /// subtraction against a monotonic start so tick wraparound cannot
    /// produce a spurious timeout.
    pub(crate) fn transact(
        &self,
        request: Service,
        expected: Expected,
    ) -> Result<Vec<u8>, DiagError> {
        if request.len() > self.settings.max_service_size {
            return Err(DiagError::OutOfRange(format!(
                "request of {} bytes exceeds the configured maximum of {}",
                request.len(),
                self.settings.max_service_size
            )));
        }
        let mut inner = self.inner.lock();
        inner
            .transport
            .as_mut()
            .ok_or(DiagError::NotConfigured)?
            .enqueue_request(request)?;

        let mut window_start = Instant::now();
        let mut last_long_wait = window_start;
        loop {
            if let Some(polled) = self.cycle_inner(&mut inner, Some(&expected))? {
                match polled {
                    Polled::Positive(data) => return Ok(data),
                    Polled::Negative(NegativeResponseCode::ResponsePending) => {
                        debug!(
                            service = format!("0x{:02X}", expected.service),
                            "response pending, deadline extended"
                        );
                        window_start = Instant::now();
                    }
                    Polled::Negative(nrc) => {
                        return Err(DiagError::NegativeResponse {
                            service: expected.service,
                            nrc,
                        })
                    }
                }
            }

            let now = Instant::now();
            if now.duration_since(window_start) >= self.settings.poll_timeout() {
                return Err(DiagError::Timeout);
            }
            if now.duration_since(last_long_wait) >= self.settings.long_wait_interval() {
                self.events.on_long_wait();
                last_long_wait = now;
            }
            // cooperative scheduling point, never a busy spin
            thread::yield_now();
        }
    }

    /// Send a request that gets no response (resets, tunnel frames).
    pub(crate) fn send_only(&self, request: Service) -> Result<(), DiagError> {
        let mut inner = self.inner.lock();
        let tp = inner.transport.as_mut().ok_or(DiagError::NotConfigured)?;
        tp.enqueue_request(request)?;
        tp.cycle()
            .map_err(|e| DiagError::CommunicationFailure(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn max_service_size(&self) -> usize {
        self.settings.max_service_size
    }
}

/// Decode a tunnelled frame: `[id(4, big-endian), dlc, data...]`.
fn decode_tunnel_frame(data: &[u8]) -> Option<CanFrame> {
    if data.len() < 5 {
        return None;
    }
    let id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) & EXTENDED_ID_MASK;
    let dlc = usize::from(data[4]);
    if dlc > 8 || data.len() < 5 + dlc {
        return None;
    }
    Some(CanFrame::extended(id, &data[5..5 + dlc]))
}
