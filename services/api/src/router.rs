//! Axum Router Configuration
//!
//! This module defines the HTTP routing for the application: the WebSocket
//! endpoint plus a liveness probe.

use crate::{state::AppState, ws::ws_handler};

use axum::{Router, http::StatusCode, routing::get};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state(app_state)
}
