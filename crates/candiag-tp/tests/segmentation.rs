//! End-to-end segmentation tests running two transports against a
//! loopback bus, one per direction of a client/server pair.

use std::sync::Arc;
use std::time::Duration;

use candiag_tp::address;
use candiag_tp::bus::{CanBus, ClientHandle};
use candiag_tp::frame::CanFrame;
use candiag_tp::{
    CanTransport, MessageTransport, MockBus, NodeId, Service, TpError, TpTimings,
};

const CLIENT: u8 = 0x05;
const SERVER: u8 = 0x09;

fn nodes() -> (NodeId, NodeId) {
    (NodeId::new(0, CLIENT).unwrap(), NodeId::new(0, SERVER).unwrap())
}

fn pair(timings: TpTimings) -> (Arc<MockBus>, CanTransport, CanTransport) {
    let bus = Arc::new(MockBus::new());
    let (client, server) = nodes();
    let requester =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, client, server, timings.clone()).unwrap();
    let responder =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, server, client, timings).unwrap();
    (bus, requester, responder)
}

fn pump(a: &mut CanTransport, b: &mut CanTransport, cycles: usize) {
    for _ in 0..cycles {
        a.cycle().unwrap();
        b.cycle().unwrap();
    }
}

/// Extra bus client whose queue records every frame with the given id.
fn spy(bus: &MockBus, id: u32) -> ClientHandle {
    let handle = bus.register_client();
    bus.set_receive_filter(
        handle,
        candiag_tp::ReceiveFilter {
            match_id: id,
            mask: address::EXTENDED_ID_MASK,
            extended_only: true,
        },
    )
    .unwrap();
    handle
}

fn drain_spy(bus: &MockBus, handle: ClientHandle) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    while let Some(f) = bus.read_from_queue(handle) {
        frames.push(f);
    }
    frames
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i & 0xFF) as u8).collect()
}

#[test]
fn single_frame_roundtrip() {
    let (_bus, mut req, mut resp) = pair(TpTimings::default());
    req.enqueue_request(Service::new(vec![0x3E, 0x00])).unwrap();
    pump(&mut req, &mut resp, 2);
    let got = resp.read_response().unwrap();
    assert_eq!(got.data, vec![0x3E, 0x00]);
    assert!(resp.read_response().is_none());
}

#[test]
fn multi_frame_transfer_with_flow_control() {
    let (_bus, mut req, mut resp) = pair(TpTimings::default());
    let data = payload(300);
    req.enqueue_request(Service::new(data.clone())).unwrap();
    pump(&mut req, &mut resp, 4);
    assert_eq!(resp.read_response().unwrap().data, data);
}

#[test]
fn maximum_length_transfer() {
    let (_bus, mut req, mut resp) = pair(TpTimings::default());
    let data = payload(4095);
    req.enqueue_request(Service::new(data.clone())).unwrap();
    pump(&mut req, &mut resp, 4);
    assert_eq!(resp.read_response().unwrap().data, data);
}

#[test]
fn omf_transfer_completes_without_flow_control() {
    let (bus, mut req, mut resp) = pair(TpTimings::default());
    let (client, server) = nodes();
    // responder -> requester direction carries only flow control here
    let fc_spy = spy(&bus, address::request_id(server, client));

    let data = payload(100);
    req.enqueue_request(Service::without_flow_control(data.clone()))
        .unwrap();
    pump(&mut req, &mut resp, 2);

    assert_eq!(resp.read_response().unwrap().data, data);
    assert!(
        drain_spy(&bus, fc_spy).is_empty(),
        "no flow control expected for an OMF transfer"
    );
}

#[test]
fn oversized_requests_are_rejected_up_front() {
    let (_bus, mut req, _resp) = pair(TpTimings::default());
    assert!(matches!(
        req.enqueue_request(Service::new(payload(4096))),
        Err(TpError::Config(_))
    ));
    assert!(matches!(
        req.enqueue_request(Service::without_flow_control(payload(256))),
        Err(TpError::Config(_))
    ));
}

#[test]
fn request_queue_depth_is_enforced() {
    let timings = TpTimings {
        tx_queue_depth: 1,
        ..TpTimings::default()
    };
    let (_bus, mut req, _resp) = pair(timings);
    req.enqueue_request(Service::new(vec![0x10, 0x03])).unwrap();
    assert!(matches!(
        req.enqueue_request(Service::new(vec![0x10, 0x01])),
        Err(TpError::Overflow)
    ));
}

#[test]
fn completed_services_beyond_queue_depth_are_dropped() {
    let timings = TpTimings {
        rx_queue_depth: 1,
        ..TpTimings::default()
    };
    let (_bus, mut req, mut resp) = pair(timings);
    req.enqueue_request(Service::new(vec![0x22, 0xF1, 0x8C])).unwrap();
    req.enqueue_request(Service::new(vec![0x22, 0xF1, 0x95])).unwrap();
    pump(&mut req, &mut resp, 3);

    assert_eq!(resp.read_response().unwrap().data, vec![0x22, 0xF1, 0x8C]);
    assert!(resp.read_response().is_none(), "overflow frame must be dropped");
}

#[test]
fn sequence_error_abandons_inbound_transfer() {
    let bus = Arc::new(MockBus::new());
    let (client, server) = nodes();
    let mut rx =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, client, server, TpTimings::default())
            .unwrap();
    let id = address::request_id(server, client);

    bus.send(&CanFrame::extended(id, &[0x10, 0x14, 1, 2, 3, 4, 5, 6]))
        .unwrap();
    rx.cycle().unwrap();
    // SN 2 where 1 is expected
    bus.send(&CanFrame::extended(id, &[0x22, 7, 8, 9, 10, 11, 12, 13]))
        .unwrap();
    rx.cycle().unwrap();
    // the rest of the original transfer must not resurrect it
    bus.send(&CanFrame::extended(id, &[0x21, 7, 8, 9, 10, 11, 12, 13]))
        .unwrap();
    bus.send(&CanFrame::extended(id, &[0x22, 14, 15, 16, 17, 18, 19, 20]))
        .unwrap();
    rx.cycle().unwrap();

    assert!(rx.read_response().is_none());
}

#[test]
fn nonzero_flow_control_parameters_do_not_advance_the_transfer() {
    let bus = Arc::new(MockBus::new());
    let (client, server) = nodes();
    let mut tx =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, client, server, TpTimings::default())
            .unwrap();
    let cf_spy = spy(&bus, address::request_id(client, server));

    tx.enqueue_request(Service::new(payload(20))).unwrap();
    tx.cycle().unwrap();
    assert_eq!(drain_spy(&bus, cf_spy).len(), 1, "first frame only");

    // continue-to-send with a window of 4: unsupported
    bus.send(&CanFrame::extended(
        address::request_id(server, client),
        &[0x30, 0x04, 0x00],
    ))
    .unwrap();
    tx.cycle().unwrap();
    assert!(
        drain_spy(&bus, cf_spy).is_empty(),
        "no consecutive frames after an unsupported flow control"
    );

    // a conforming flow control afterwards still unblocks it
    bus.send(&CanFrame::extended(
        address::request_id(server, client),
        &[0x30, 0x00, 0x00],
    ))
    .unwrap();
    tx.cycle().unwrap();
    bus.dispatch_incoming();
    assert_eq!(drain_spy(&bus, cf_spy).len(), 2, "two consecutive frames");
}

#[test]
fn duplicate_flow_control_does_not_abandon_a_sending_transfer() {
    let bus = Arc::new(MockBus::new());
    let (client, server) = nodes();
    let mut tx =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, client, server, TpTimings::default())
            .unwrap();
    let cf_spy = spy(&bus, address::request_id(client, server));

    tx.enqueue_request(Service::new(payload(30))).unwrap();
    tx.cycle().unwrap();
    assert_eq!(drain_spy(&bus, cf_spy).len(), 1, "first frame only");

    // two conforming flow controls drained in the same cycle, with the
    // send queue full for the first consecutive frame; the duplicate
    // must not touch the in-progress transfer
    let fc_id = address::request_id(server, client);
    bus.send(&CanFrame::extended(fc_id, &[0x30, 0x00, 0x00])).unwrap();
    bus.send(&CanFrame::extended(fc_id, &[0x30, 0x00, 0x00])).unwrap();
    bus.fail_next_sends(1);
    tx.cycle().unwrap();
    tx.cycle().unwrap();
    bus.dispatch_incoming();

    let frames = drain_spy(&bus, cf_spy);
    assert_eq!(frames.len(), 4, "all four consecutive frames sent");
    assert!(frames.iter().all(|f| f.data[0] & 0xF0 == 0x20));
}

#[test]
fn missing_flow_control_times_out() {
    let timings = TpTimings {
        n_bs_ms: 10,
        ..TpTimings::default()
    };
    let bus = Arc::new(MockBus::new());
    let (client, server) = nodes();
    let mut tx =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, client, server, timings).unwrap();
    let cf_spy = spy(&bus, address::request_id(client, server));

    tx.enqueue_request(Service::new(payload(20))).unwrap();
    tx.cycle().unwrap();
    drain_spy(&bus, cf_spy);

    std::thread::sleep(Duration::from_millis(20));
    tx.cycle().unwrap();

    // a late flow control must find the transfer already abandoned
    bus.send(&CanFrame::extended(
        address::request_id(server, client),
        &[0x30, 0x00, 0x00],
    ))
    .unwrap();
    tx.cycle().unwrap();
    assert!(drain_spy(&bus, cf_spy).is_empty());
}

#[test]
fn full_send_queue_defers_consecutive_frames() {
    let (bus, mut req, mut resp) = pair(TpTimings::default());
    let data = payload(30); // first frame plus four consecutive frames
    req.enqueue_request(Service::new(data.clone())).unwrap();

    req.cycle().unwrap(); // first frame out
    resp.cycle().unwrap(); // flow control out

    bus.fail_next_sends(2);
    req.cycle().unwrap(); // flow control in, first consecutive frame rejected
    req.cycle().unwrap(); // second rejection
    pump(&mut req, &mut resp, 2);

    assert_eq!(resp.read_response().unwrap().data, data);
}

#[test]
fn newer_first_frame_replaces_a_stalled_transfer() {
    let bus = Arc::new(MockBus::new());
    let (client, server) = nodes();
    let mut rx =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, client, server, TpTimings::default())
            .unwrap();
    let id = address::request_id(server, client);

    bus.send(&CanFrame::extended(id, &[0x10, 0x20, 1, 2, 3, 4, 5, 6]))
        .unwrap();
    rx.cycle().unwrap();

    // second transfer starts before the first finished; 10 bytes total
    bus.send(&CanFrame::extended(id, &[0x10, 0x0A, 9, 8, 7, 6, 5, 4]))
        .unwrap();
    bus.send(&CanFrame::extended(id, &[0x21, 3, 2, 1, 0, 0, 0, 0]))
        .unwrap();
    rx.cycle().unwrap();

    assert_eq!(rx.read_response().unwrap().data, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
}

#[test]
fn reconfigure_drops_queued_and_inflight_state() {
    let bus = Arc::new(MockBus::new());
    let (client, server) = nodes();
    let mut tx =
        CanTransport::new(bus.clone() as Arc<dyn CanBus>, client, server, TpTimings::default())
            .unwrap();
    let old_spy = spy(&bus, address::request_id(client, server));

    tx.enqueue_request(Service::new(payload(20))).unwrap();
    let new_server = NodeId::new(0, 0x0B).unwrap();
    tx.reconfigure(client, new_server).unwrap();

    tx.cycle().unwrap();
    assert!(
        drain_spy(&bus, old_spy).is_empty(),
        "queued requests must not survive reconfiguration"
    );
}
