//! The outbound event envelope and its type registry.
//!
//! Every message the service writes to the wire is one variant of [`Event`],
//! a closed tagged union with the discriminator in a `type` field. The
//! registry is the exhaustive serde match at the decode boundary plus the
//! [`Event::kind`] mapping back to discriminator names; new kinds are added
//! by extending the union, never by open-ended type inspection.
//!
//! The wire representation is a compatibility surface: revisions may add
//! optional fields but must never remove or repurpose existing ones.

use crate::error::ErrorCode;
use crate::tool::{Vendor, VendorToolCall, VendorToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The logical actor an event is attributed to.
///
/// Internal reasoning content uses the suffixed form so clients can keep it
/// out of the visible transcript without a second discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "assistant:thought")]
    Thought,
}

/// The session identifier triple stamped on every session-scoped event.
///
/// `user_session_id` is present at every nesting depth so a receiver can
/// correlate an event to the top-level user session in O(1), without
/// replaying the subsession stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStamp {
    /// The immediate context that produced the event.
    pub session_id: Uuid,
    /// The context that spawned the producer; absent for the root session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<Uuid>,
    /// The top-level user session, regardless of nesting depth.
    pub user_session_id: Uuid,
    pub role: Role,
}

/// Classification of a nested execution context: does it hold a multi-turn
/// exchange with its parent, or run a single delegated task to completion?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsessionKind {
    Interactive,
    OneShot,
}

/// The role the delegated agent plays for its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Specialist,
    Clone,
    AssistantHelper,
    ToolExecutor,
}

/// An agent available for selection on this connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One outbound wire event.
///
/// Session-scoped variants carry a flattened [`SessionStamp`]; control
/// variants (turn signals, agent list, errors) are connection-scoped and
/// carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An agent context began producing a response.
    InteractionStart {
        #[serde(flatten)]
        stamp: SessionStamp,
    },
    /// The producing context finished; bookkeeping may still follow before
    /// the turn is returned to the client.
    InteractionEnd {
        #[serde(flatten)]
        stamp: SessionStamp,
    },
    /// An incremental fragment of visible text.
    TextDelta {
        #[serde(flatten)]
        stamp: SessionStamp,
        delta: String,
    },
    /// An incremental fragment of internal reasoning.
    ThoughtDelta {
        #[serde(flatten)]
        stamp: SessionStamp,
        delta: String,
    },
    /// The model finished a completion, with its native stop reason.
    Completion {
        #[serde(flatten)]
        stamp: SessionStamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    /// Streaming tool selection: a possibly-incomplete argument object in
    /// the vendor's native shape. Consumers must tolerate partial JSON until
    /// the terminal `tool_call` arrives.
    ToolSelectDelta {
        #[serde(flatten)]
        stamp: SessionStamp,
        vendor: Vendor,
        partial: Value,
    },
    /// A tool invocation. Emitted once with `active = true` when the call is
    /// final, and again with `result` attached once the tool has run.
    ToolCall {
        #[serde(flatten)]
        stamp: SessionStamp,
        call: VendorToolCall,
        active: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<VendorToolResult>,
    },
    /// A nested agent-to-agent context opened. Stamped with the *parent's*
    /// triple: the child does not exist until this event is observed.
    SubsessionStart {
        #[serde(flatten)]
        stamp: SessionStamp,
        subsession_id: Uuid,
        kind: SubsessionKind,
        agent_role: AgentRole,
        prime_agent_key: String,
        sub_agent_key: String,
    },
    /// The matching close bracket, stamped with the restored parent triple.
    SubsessionEnd {
        #[serde(flatten)]
        stamp: SessionStamp,
        subsession_id: Uuid,
    },
    /// A finalized transcript entry (history is consistent up to here).
    HistoryDelta {
        #[serde(flatten)]
        stamp: SessionStamp,
        content: String,
    },
    /// Control: the client may submit input again.
    TurnStart,
    /// Control: client input was accepted; the agent holds the turn.
    TurnEnd,
    /// Control: the agents available on this connection.
    AgentList { agents: Vec<AgentInfo> },
    /// Control: a structured, connection-scoped error report.
    Error { code: ErrorCode, message: String },
}

impl Event {
    /// The wire discriminator for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::InteractionStart { .. } => "interaction_start",
            Event::InteractionEnd { .. } => "interaction_end",
            Event::TextDelta { .. } => "text_delta",
            Event::ThoughtDelta { .. } => "thought_delta",
            Event::Completion { .. } => "completion",
            Event::ToolSelectDelta { .. } => "tool_select_delta",
            Event::ToolCall { .. } => "tool_call",
            Event::SubsessionStart { .. } => "subsession_start",
            Event::SubsessionEnd { .. } => "subsession_end",
            Event::HistoryDelta { .. } => "history_delta",
            Event::TurnStart => "turn_start",
            Event::TurnEnd => "turn_end",
            Event::AgentList { .. } => "agent_list",
            Event::Error { .. } => "error",
        }
    }

    /// The stamp, when this is a session-scoped event.
    pub fn stamp(&self) -> Option<&SessionStamp> {
        match self {
            Event::InteractionStart { stamp }
            | Event::InteractionEnd { stamp }
            | Event::TextDelta { stamp, .. }
            | Event::ThoughtDelta { stamp, .. }
            | Event::Completion { stamp, .. }
            | Event::ToolSelectDelta { stamp, .. }
            | Event::ToolCall { stamp, .. }
            | Event::SubsessionStart { stamp, .. }
            | Event::SubsessionEnd { stamp, .. }
            | Event::HistoryDelta { stamp, .. } => Some(stamp),
            Event::TurnStart
            | Event::TurnEnd
            | Event::AgentList { .. }
            | Event::Error { .. } => None,
        }
    }

    /// Builds the structured `error` control event for a protocol error.
    pub fn error(err: &crate::error::ProtocolError) -> Event {
        Event::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
