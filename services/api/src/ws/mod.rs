//! WebSocket Connection Handling
//!
//! This module contains the real-time surface of the service:
//!
//! - `protocol`: the inbound JSON message format and its decode boundary.
//! - `session`: the per-connection coordinator, from handshake to termination.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
