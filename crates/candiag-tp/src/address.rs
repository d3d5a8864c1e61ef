//! Arbitration-id and receive-filter derivation.
//!
//! All ids are 29-bit extended; 11-bit addressing is not used by this
//! protocol. Three schemes exist:
//!
//! - same-bus point-to-point ("normal fixed"): `0x18DAttss` with `tt` the
//!   target node and `ss` the source node,
//! - cross-bus routed: `0x1BC00000` with source bus/node and target
//!   bus/node packed into the lower 26 bits,
//! - broadcast: `0x18DB7Fss`, addressed to the all-nodes id `0x7F`.

use crate::bus::ReceiveFilter;
use crate::error::TpError;

/// Reserved node id addressing every node on the bus.
pub const NODE_BROADCAST: u8 = 0x7F;

/// All 29 identifier bits.
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

const P2P_BASE: u32 = 0x18DA_0000;
const BROADCAST_BASE: u32 = 0x18DB_0000;
const ROUTED_BASE: u32 = 0x1BC0_0000;

/// Identifies one node: bus index 0..=15 plus node id 0..=126
/// (127 is reserved for broadcast).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    bus: u8,
    node: u8,
}

impl NodeId {
    /// Validate and build a node identifier.
    pub fn new(bus: u8, node: u8) -> Result<Self, TpError> {
        if bus > 0x0F {
            return Err(TpError::Config(format!("bus id {bus} exceeds 15")));
        }
        if node >= NODE_BROADCAST {
            return Err(TpError::Config(format!("node id {node} exceeds 126")));
        }
        Ok(Self { bus, node })
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn node(&self) -> u8 {
        self.node
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.bus, self.node)
    }
}

/// Id used by `client` to address `server` point-to-point.
///
/// Nodes on the same bus use normal fixed addressing; a differing bus id
/// selects the routed form so gateways can forward the frame.
pub fn request_id(client: NodeId, server: NodeId) -> u32 {
    if client.bus == server.bus {
        P2P_BASE | u32::from(server.node) << 8 | u32::from(client.node)
    } else {
        ROUTED_BASE
            | u32::from(client.bus) << 18
            | u32::from(client.node) << 11
            | u32::from(server.bus) << 7
            | u32::from(server.node)
    }
}

/// Id used by `client` for bus-wide broadcasts.
pub fn broadcast_id(client: NodeId) -> u32 {
    BROADCAST_BASE | u32::from(NODE_BROADCAST) << 8 | u32::from(client.node)
}

/// Filter matching responses `server` sends back to `client`.
///
/// The mirror of [`request_id`] with the roles swapped, matched exactly.
pub fn response_filter(client: NodeId, server: NodeId) -> ReceiveFilter {
    ReceiveFilter {
        match_id: request_id(server, client),
        mask: EXTENDED_ID_MASK,
        extended_only: true,
    }
}

/// Filter matching anything addressed to `client`, from any sender.
///
/// Used while collecting broadcast responses: the low 7 bits carry the
/// responder's node id and are excluded from the match.
pub fn broadcast_response_filter(client: NodeId) -> ReceiveFilter {
    ReceiveFilter {
        match_id: P2P_BASE | u32::from(client.node) << 8,
        mask: EXTENDED_ID_MASK & !0x7F,
        extended_only: true,
    }
}

/// Node id of the sender of a point-to-point frame.
pub fn responder_node(id: u32) -> u8 {
    (id & 0x7F) as u8
}
