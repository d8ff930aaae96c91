//! Protocol error taxonomy.
//!
//! Errors are split into two severities: fatal violations, after which the
//! connection's hierarchy and turn state can no longer be trusted, and
//! recoverable errors that are reported to the client as structured `error`
//! events while the connection stays open.

use serde::{Deserialize, Serialize};

/// Errors raised by the protocol core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// Mismatched subsession bracketing or turn-state corruption. Fatal: the
    /// connection must be closed because attribution is no longer reliable.
    #[error("protocol violation: {0}")]
    Violation(String),

    /// Client input arrived while the agent still holds the turn. The input
    /// is discarded and the client is told to wait; no state changes.
    #[error("input rejected: the agent is still processing the current turn")]
    OutOfTurn,

    /// An inbound message carried a discriminator the type registry does not
    /// know. Reported to the client, connection stays open.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// An inbound message had a known discriminator but an undecodable body.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A subsession start would exceed the configured nesting cap. The start
    /// is rejected so the delegating context can adapt.
    #[error("subsession depth limit of {0} exceeded")]
    DepthLimitExceeded(usize),
}

/// Machine-readable error discriminator carried on `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ProtocolViolation,
    OutOfTurn,
    UnknownEventType,
    MalformedPayload,
    DepthLimitExceeded,
    RuntimeFailure,
}

impl ProtocolError {
    /// Whether this error invalidates the connection's protocol state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Violation(_))
    }

    /// The wire-level code used when reporting this error to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Violation(_) => ErrorCode::ProtocolViolation,
            ProtocolError::OutOfTurn => ErrorCode::OutOfTurn,
            ProtocolError::UnknownEventType(_) => ErrorCode::UnknownEventType,
            ProtocolError::MalformedPayload(_) => ErrorCode::MalformedPayload,
            ProtocolError::DepthLimitExceeded(_) => ErrorCode::DepthLimitExceeded,
        }
    }
}
