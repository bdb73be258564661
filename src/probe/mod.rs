//! Minimal hand-rolled protocol probe
//!
//! - [`frame`] - CONNECT encoding and CONNACK parsing
//! - [`raw`] - raw TCP probe with a bounded liveness check

pub mod frame;
pub mod raw;

pub use frame::{ConnAck, ConnectFrame};
pub use raw::{ProbeKind, RawProtocolProbe};
