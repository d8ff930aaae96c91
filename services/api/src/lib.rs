//! Cadence API Library Crate
//!
//! This library contains all the logic for the Cadence web service: the
//! application state, agent runtime, speech side-channel, WebSocket
//! coordinator and routing. The `api` binary is a thin wrapper around it.

pub mod config;
pub mod router;
pub mod runtime;
pub mod speech;
pub mod state;
pub mod ws;
