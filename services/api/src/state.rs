//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources handed to each connection coordinator.

use crate::config::Config;
use crate::runtime::AgentRuntime;
use crate::speech::SpeechSink;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<dyn AgentRuntime>,
    pub speech: Arc<dyn SpeechSink>,
    pub config: Arc<Config>,
}
