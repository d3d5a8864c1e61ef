//! candiag-tp - segmented CAN transport for the candiag diagnostic stack
//!
//! This crate implements the frame-level half of the protocol: the PCI
//! codec, arbitration-id derivation, and the single-Tx/single-Rx
//! segmentation state machine that turns application-layer services
//! into CAN frames and back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     CanTransport                        │
//! │  Implements MessageTransport trait                      │
//! │                                                         │
//! │  ┌───────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │ pci codec │  │ addressing  │  │ Tx/Rx transfer   │  │
//! │  │ (SF/FF/   │  │ (29-bit id  │  │ state machines   │  │
//! │  │  CF/FC)   │  │  formulas)  │  │ (cycle driven)   │  │
//! │  └───────────┘  └─────────────┘  └──────────────────┘  │
//! │                          │                              │
//! │                   ┌──────┴──────┐                       │
//! │                   │   CanBus    │                       │
//! │                   │ (queue i/f) │                       │
//! │                   └─────────────┘                       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`CanBus`] trait models the external, shared CAN queue (register a
//! logical client, install a receive filter, send, dequeue). A software
//! loopback implementation lives in [`mock`] for tests and simulation.

pub mod address;
pub mod bus;
pub mod config;
pub mod error;
pub mod frame;
pub mod mock;
pub mod pci;
pub mod service;
pub mod transport;

pub use address::NodeId;
pub use bus::{BusError, CanBus, ClientHandle, ReceiveFilter};
pub use config::TpTimings;
pub use error::TpError;
pub use frame::CanFrame;
pub use mock::MockBus;
pub use service::Service;
pub use transport::{CanTransport, MessageTransport};
