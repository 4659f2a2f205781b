//! Shared building blocks for Girder.
//!
//! This crate holds the types every other Girder crate agrees on:
//! - Validated identifiers for broadcastings, stream keys, and connections
//! - The `Stamp` type and per-key monotonic stamp generation
//! - The wire protocol (message envelope and client/server frames)
//! - A dependency-free common error type

pub mod errors;
pub mod ids;
pub mod protocol;
pub mod stamp;

pub use errors::{CommonError, Result};
pub use ids::{BroadcastingName, ConnectionId, StreamKey};
pub use protocol::{ClientMessage, Envelope, ServerMessage};
pub use stamp::{Stamp, StampGenerator};
