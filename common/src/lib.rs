//! Wire-protocol types shared between the broodlink engine and incubator
//! controller firmware.
//!
//! This crate provides:
//! - Classification and decoding of UDP announcement datagrams
//! - Request/response body types for the controller HTTP endpoints
//! - Protocol-level defaults (ports)

mod protocol;

pub use protocol::*;

/// Default UDP port on which controllers broadcast announcements.
pub const DEFAULT_BROADCAST_PORT: u16 = 8080;

/// Default TCP port on which controllers serve their HTTP endpoints
/// (`/data`, `/pair`).
pub const DEFAULT_DEVICE_PORT: u16 = 8080;
