//! candiag-client - diagnostic session and broadcast client
//!
//! Built on top of `candiag-tp`, this crate implements the
//! application-layer half of the protocol: a session driver that turns
//! request/response services into typed operations, and a broadcast
//! client for bus-wide node discovery and configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      SessionDriver                       │
//! │                                                          │
//! │  ┌──────────────┐  ┌───────────────┐  ┌──────────────┐  │
//! │  │ service      │  │ poll loop     │  │ async event  │  │
//! │  │ wrappers     │→ │ (try-lock     │→ │ dispatch     │  │
//! │  │ (typed ops)  │  │  arbiter)     │  │ (event sink) │  │
//! │  └──────────────┘  └───────────────┘  └──────────────┘  │
//! │                          │                               │
//! │                ┌─────────┴─────────┐                     │
//! │                │ MessageTransport  │    ┌─────────────┐  │
//! │                │  (candiag-tp)     │    │ Broadcast   │  │
//! │                └───────────────────┘    │ Client      │  │
//! │                          │              └──────┬──────┘  │
//! │                       CanBus ←──────────────────┘        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The driver is pumped cooperatively: callers invoke [`SessionDriver::cycle`]
//! periodically (or let a synchronous service call pump for them) and
//! receive event-driven traffic through the [`DiagnosticEvents`] sink.
//! The broadcast client sits beside the driver, talking to the bus
//! directly, because its responses come from many unknown senders.

pub mod broadcast;
pub mod builder;
pub mod config;
pub mod datapool;
pub mod driver;
pub mod error;
pub mod events;
pub mod nrc;
pub mod records;
pub mod services;

pub use broadcast::BroadcastClient;
pub use builder::ServiceBuilder;
pub use config::{DiagConfig, SessionSettings};
pub use datapool::{DataPoolId, DataPoolMetaData};
pub use driver::SessionDriver;
pub use error::DiagError;
pub use events::{DiagnosticEvents, NullEvents};
pub use nrc::NegativeResponseCode;
pub use records::{FeatureList, Fingerprint, FlashBlockInfo, SerialNumber};
