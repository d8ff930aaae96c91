//! Inbound client messages and their decode boundary.
//!
//! Decoding is two-phase so the two failure modes stay distinct on the wire:
//! a frame whose `type` is not in [`KNOWN_KINDS`] is `unknown_event_type`,
//! while a known kind with a bad body is `malformed_payload`. Both are
//! recoverable; the connection stays up.

use cadence_core::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every inbound discriminator this revision understands.
pub const KNOWN_KINDS: &[&str] = &["init", "input", "select_agent", "list_agents"];

/// A message from the external client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Connection handshake; must be the first frame.
    Init {
        /// The agent to address; defaults to the first advertised agent.
        #[serde(default)]
        agent_key: Option<String>,
    },
    /// Conversational input, admitted through the turn gate.
    Input {
        text: String,
        #[serde(default)]
        attachments: Vec<String>,
    },
    /// Switch the addressed agent; only legal while the client holds the turn.
    SelectAgent { agent_key: String },
    /// Re-request the agent list.
    ListAgents,
}

impl ClientMessage {
    /// The wire discriminator for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Init { .. } => "init",
            ClientMessage::Input { .. } => "input",
            ClientMessage::SelectAgent { .. } => "select_agent",
            ClientMessage::ListAgents => "list_agents",
        }
    }
}

/// Decodes one inbound text frame.
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedPayload("missing `type` field".to_string()))?;
    if !KNOWN_KINDS.contains(&kind) {
        return Err(ProtocolError::UnknownEventType(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_known_kind() {
        let init = decode(r#"{"type":"init","agent_key":"prime"}"#).unwrap();
        assert_eq!(init.kind(), "init");

        let input = decode(r#"{"type":"input","text":"hello"}"#).unwrap();
        match input {
            ClientMessage::Input { text, attachments } => {
                assert_eq!(text, "hello");
                assert!(attachments.is_empty());
            }
            other => panic!("expected input, got {}", other.kind()),
        }

        assert_eq!(
            decode(r#"{"type":"select_agent","agent_key":"reviewer"}"#)
                .unwrap()
                .kind(),
            "select_agent"
        );
        assert_eq!(decode(r#"{"type":"list_agents"}"#).unwrap().kind(), "list_agents");
    }

    #[test]
    fn unknown_kind_is_distinguished_from_bad_body() {
        let unknown = decode(r#"{"type":"telepathy"}"#).unwrap_err();
        assert!(matches!(unknown, ProtocolError::UnknownEventType(k) if k == "telepathy"));

        let malformed = decode(r#"{"type":"input"}"#).unwrap_err();
        assert!(matches!(malformed, ProtocolError::MalformedPayload(_)));
        assert!(!malformed.is_fatal());
    }

    #[test]
    fn non_json_and_untyped_frames_are_malformed() {
        assert!(matches!(
            decode("not json"),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode(r#"{"text":"no discriminator"}"#),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }
}
