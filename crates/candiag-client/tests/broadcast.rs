//! Broadcast discovery/configuration tests with simulated responder
//! nodes. Each responder is a raw bus client listening on the
//! broadcast id and answering point-to-point with its own sender id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use candiag_tp::bus::ReceiveFilter;
use candiag_tp::pci::{self, Pdu};
use candiag_tp::{address, CanBus, MockBus, NodeId};

use candiag_client::{BroadcastClient, DiagError, NegativeResponseCode, SerialNumber};

const WINDOW: Duration = Duration::from_millis(80);

fn client_node() -> NodeId {
    NodeId::new(0, 1).unwrap()
}

struct Responder {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Responder {
    fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.thread.join().unwrap();
    }
}

/// Node answering broadcasts with zero or more single frames.
fn spawn_responder(
    bus: Arc<MockBus>,
    node: NodeId,
    client: NodeId,
    mut handler: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
) -> Responder {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let thread = std::thread::spawn(move || {
        let handle = bus.register_client();
        bus.set_receive_filter(
            handle,
            ReceiveFilter {
                match_id: address::broadcast_id(client),
                mask: address::EXTENDED_ID_MASK,
                extended_only: true,
            },
        )
        .unwrap();
        let tx_id = address::request_id(node, client);
        while !stop_flag.load(Ordering::SeqCst) {
            bus.dispatch_incoming();
            while let Some(frame) = bus.read_from_queue(handle) {
                if let Ok(Pdu::Single { payload }) = pci::decode(&frame) {
                    for resp in handler(&payload) {
                        bus.send(&pci::encode_single(tx_id, &resp)).unwrap();
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        bus.remove_client(handle);
    });
    Responder { stop, thread }
}

/// Responder implementing the two-part id assignment handshake for one
/// serial number.
fn id_assignment_handler(
    serial: [u8; 6],
) -> impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static {
    let mut part1_ok = false;
    move |req: &[u8]| match req {
        [0x42, 0x01, head @ ..] => {
            part1_ok = *head == serial[..5];
            vec![]
        }
        [0x42, 0x02, tail, bus, node] => {
            if part1_ok && *tail == serial[5] {
                vec![vec![0xC2, *bus, *node]]
            } else {
                vec![]
            }
        }
        _ => vec![],
    }
}

#[test]
fn assignment_with_one_responder_succeeds() {
    let bus = Arc::new(MockBus::new());
    let client = client_node();
    let serial = [0x05, 0x12, 0x34, 0x56, 0x78, 0x90];
    let responder = spawn_responder(
        bus.clone(),
        NodeId::new(0, 9).unwrap(),
        client,
        id_assignment_handler(serial),
    );

    let bc = BroadcastClient::new(bus.clone() as Arc<dyn CanBus>, client, WINDOW).unwrap();
    let new_id = NodeId::new(0, 0x20).unwrap();
    assert_eq!(bc.set_node_id_by_serial_number(&serial, new_id).unwrap(), 9);
    responder.stop();
}

#[test]
fn assignment_with_no_responder_times_out() {
    let bus = Arc::new(MockBus::new());
    let client = client_node();
    let bc = BroadcastClient::new(bus as Arc<dyn CanBus>, client, WINDOW).unwrap();
    assert_eq!(
        bc.set_node_id_by_serial_number(&[0x05; 6], NodeId::new(0, 0x20).unwrap()),
        Err(DiagError::Timeout)
    );
}

#[test]
fn duplicate_serials_are_a_fault() {
    let bus = Arc::new(MockBus::new());
    let client = client_node();
    let serial = [0x05, 0x12, 0x34, 0x56, 0x78, 0x90];
    let first = spawn_responder(
        bus.clone(),
        NodeId::new(0, 9).unwrap(),
        client,
        id_assignment_handler(serial),
    );
    let second = spawn_responder(
        bus.clone(),
        NodeId::new(0, 10).unwrap(),
        client,
        id_assignment_handler(serial),
    );

    let bc = BroadcastClient::new(bus.clone() as Arc<dyn CanBus>, client, WINDOW).unwrap();
    let result = bc.set_node_id_by_serial_number(&serial, NodeId::new(0, 0x20).unwrap());
    match result {
        Err(DiagError::DuplicateResponders(mut nodes)) => {
            nodes.sort_unstable();
            assert_eq!(nodes, vec![9, 10]);
        }
        other => panic!("expected DuplicateResponders, got {other:?}"),
    }
    first.stop();
    second.stop();
}

#[test]
fn a_lone_rejection_carries_the_code() {
    let bus = Arc::new(MockBus::new());
    let client = client_node();
    let responder = spawn_responder(
        bus.clone(),
        NodeId::new(0, 9).unwrap(),
        client,
        |req: &[u8]| match req {
            [0x42, 0x02, ..] => vec![vec![0xFF, 0x42, 0x31]],
            _ => vec![],
        },
    );

    let bc = BroadcastClient::new(bus.clone() as Arc<dyn CanBus>, client, WINDOW).unwrap();
    assert_eq!(
        bc.set_node_id_by_serial_number(&[0x05; 6], NodeId::new(0, 0x20).unwrap()),
        Err(DiagError::NegativeResponse {
            service: 0x42,
            nrc: NegativeResponseCode::RequestOutOfRange,
        })
    );
    responder.stop();
}

#[test]
fn serial_discovery_collects_every_positive() {
    let bus = Arc::new(MockBus::new());
    let client = client_node();
    let first_serial = [0x05, 0x11, 0x11, 0x11, 0x11, 0x11];
    let second_serial = [0x05, 0x22, 0x22, 0x22, 0x22, 0x22];

    let first = spawn_responder(
        bus.clone(),
        NodeId::new(0, 9).unwrap(),
        client,
        move |req: &[u8]| match req {
            [0x41] => vec![{
                let mut r = vec![0xC1];
                r.extend_from_slice(&first_serial);
                r
            }],
            _ => vec![],
        },
    );
    let second = spawn_responder(
        bus.clone(),
        NodeId::new(0, 10).unwrap(),
        client,
        move |req: &[u8]| match req {
            [0x41] => vec![{
                let mut r = vec![0xC1];
                r.extend_from_slice(&second_serial);
                r
            }],
            _ => vec![],
        },
    );

    let bc = BroadcastClient::new(bus.clone() as Arc<dyn CanBus>, client, WINDOW).unwrap();
    let mut found = bc.read_serial_numbers().unwrap();
    found.sort_by_key(|(node, _)| *node);
    assert_eq!(
        found,
        vec![
            (9, SerialNumber::standard(first_serial)),
            (10, SerialNumber::standard(second_serial)),
        ]
    );
    first.stop();
    second.stop();
}

#[test]
fn extended_discovery_reassembles_per_unique_id() {
    let bus = Arc::new(MockBus::new());
    let client = client_node();

    // node 9, unique id 0x11, serial "ALPHA"
    let first = spawn_responder(
        bus.clone(),
        NodeId::new(0, 9).unwrap(),
        client,
        |req: &[u8]| match req {
            [0x47] => vec![
                vec![0xC7, 0x11, 0, 0x00, 0x01],
                vec![0xC7, 0x11, 1, 5, 0],
                vec![0xC7, 0x11, 2, b'A', b'L'],
                vec![0xC7, 0x11, 3, b'P', b'H'],
                vec![0xC7, 0x11, 4, b'A', 0],
            ],
            _ => vec![],
        },
    );
    // node 10, unique id 0x22, serial "BX"
    let second = spawn_responder(
        bus.clone(),
        NodeId::new(0, 10).unwrap(),
        client,
        |req: &[u8]| match req {
            [0x47] => vec![
                vec![0xC7, 0x22, 0, 0x00, 0x01],
                vec![0xC7, 0x22, 1, 2, 0],
                vec![0xC7, 0x22, 2, b'B', b'X'],
            ],
            _ => vec![],
        },
    );

    let bc = BroadcastClient::new(bus.clone() as Arc<dyn CanBus>, client, WINDOW).unwrap();
    let mut found = bc.read_serial_numbers_extended().unwrap();
    found.sort_by_key(|(node, _)| *node);
    assert_eq!(
        found,
        vec![
            (9, SerialNumber::Extended("ALPHA".into())),
            (10, SerialNumber::Extended("BX".into())),
        ]
    );
    first.stop();
    second.stop();
}

#[test]
fn fire_and_forget_broadcasts_reach_every_node() {
    let bus = Arc::new(MockBus::new());
    let client = client_node();
    let seen = Arc::new(AtomicBool::new(false));

    let flag = seen.clone();
    let responder = spawn_responder(
        bus.clone(),
        NodeId::new(0, 9).unwrap(),
        client,
        move |req: &[u8]| {
            if req == [0x46] {
                flag.store(true, Ordering::SeqCst);
            }
            vec![]
        },
    );

    let bc = BroadcastClient::new(bus.clone() as Arc<dyn CanBus>, client, WINDOW).unwrap();
    bc.enter_preprogramming_session().unwrap();

    let start = std::time::Instant::now();
    while !seen.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(1) {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(seen.load(Ordering::SeqCst));
    responder.stop();
}
