//! Per-connection composition of the protocol core.
//!
//! A [`Conversation`] owns one connection's subsession manager, turn machine
//! and delta buffers, and turns raw producer events into stamped wire events
//! plus side-channel actions. It is deliberately transport-free: the
//! coordinator task that owns the socket is the *only* mutator (single-writer
//! discipline), so no internal locking is needed and an interleaved pop/push
//! on the context stack cannot happen.

use crate::delta::DeltaBuffers;
use crate::error::{ErrorCode, ProtocolError};
use crate::event::{AgentRole, Event, Role, SubsessionKind};
use crate::subsession::{SubsessionHandle, SubsessionManager, DEFAULT_MAX_DEPTH};
use crate::tool::{Vendor, VendorToolCall, VendorToolResult};
use crate::turn::{TurnMachine, TurnState};
use serde_json::Value;
use uuid::Uuid;

/// A raw event from an agent-context producer, in provider-native terms.
/// The core does not know how inference happens; it only routes and stamps
/// what the producer emits.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    InteractionStarted,
    TextDelta(String),
    ThoughtDelta(String),
    ToolSelectDelta { vendor: Vendor, partial: Value },
    ToolCall(VendorToolCall),
    ToolResult {
        call: VendorToolCall,
        result: VendorToolResult,
    },
    /// The current context delegates to a nested agent.
    SubsessionBegin {
        kind: SubsessionKind,
        agent_role: AgentRole,
        sub_agent_key: String,
    },
    /// The innermost open delegation finished.
    SubsessionEnd,
    Completed { stop_reason: Option<String> },
    InteractionEnded,
    Failed(String),
}

/// What the coordinator should do with one piece of conversation output.
#[derive(Debug, Clone)]
pub enum Output {
    /// Serialize and write to the primary client.
    Wire(Event),
    /// Hand to the side-channel consumer, best-effort.
    Flush(String),
    /// Fire the one-shot engagement hook on the side-channel consumer.
    ThinkingStarted,
}

/// Tunables for one conversation.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub max_subsession_depth: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_subsession_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// The protocol state for one duplex connection.
pub struct Conversation {
    subsessions: SubsessionManager,
    turn: TurnMachine,
    buffers: DeltaBuffers,
    /// Handles for subsessions opened by runtime signals, innermost last.
    open_handles: Vec<SubsessionHandle>,
    /// Assistant text of the in-flight root interaction, finalized into a
    /// `history_delta` on completion.
    transcript: String,
}

impl Conversation {
    pub fn new(agent_key: impl Into<String>, config: ConversationConfig) -> Self {
        Self {
            subsessions: SubsessionManager::new(agent_key, config.max_subsession_depth),
            turn: TurnMachine::new(),
            buffers: DeltaBuffers::new(),
            open_handles: Vec::new(),
            transcript: String::new(),
        }
    }

    /// The id of the top-level user session.
    pub fn user_session_id(&self) -> Uuid {
        self.subsessions.root_id()
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn.state()
    }

    /// Admits client input through the turn gate.
    ///
    /// On success the turn passes to the agent pipeline: a `turn_end` control
    /// event plus a user `history_delta` go to the wire, and the caller
    /// dispatches the input to the addressed agent context. Rejection with
    /// `OutOfTurn` leaves all state untouched and the input undelivered.
    pub fn accept_input(&mut self, text: &str) -> Result<Vec<Output>, ProtocolError> {
        self.turn.accept_input()?;
        let stamp = self.subsessions.stamp(Role::User);
        Ok(vec![
            Output::Wire(Event::TurnEnd),
            Output::Wire(Event::HistoryDelta {
                stamp,
                content: text.to_string(),
            }),
        ])
    }

    /// Routes one producer event through stamping, tool tagging and delta
    /// buffering.
    pub fn apply(&mut self, event: RuntimeEvent) -> Result<Vec<Output>, ProtocolError> {
        match event {
            RuntimeEvent::InteractionStarted => {
                if self.subsessions.depth() == 0 {
                    self.turn.note_interaction_start();
                    self.transcript.clear();
                }
                Ok(vec![Output::Wire(Event::InteractionStart {
                    stamp: self.subsessions.stamp(Role::Assistant),
                })])
            }

            RuntimeEvent::TextDelta(delta) => {
                let session_id = self.subsessions.current().id;
                if self.subsessions.depth() == 0 {
                    self.transcript.push_str(&delta);
                }
                let mut outputs = vec![Output::Wire(Event::TextDelta {
                    stamp: self.subsessions.stamp(Role::Assistant),
                    delta: delta.clone(),
                })];
                if let Some(flush) = self.buffers.append(session_id, Role::Assistant, &delta).flush {
                    outputs.push(Output::Flush(flush));
                }
                Ok(outputs)
            }

            RuntimeEvent::ThoughtDelta(delta) => {
                let session_id = self.subsessions.current().id;
                let mut outputs = Vec::new();
                if self.buffers.first_thought(session_id) {
                    outputs.push(Output::ThinkingStarted);
                }
                outputs.push(Output::Wire(Event::ThoughtDelta {
                    stamp: self.subsessions.stamp(Role::Thought),
                    delta: delta.clone(),
                }));
                if let Some(flush) = self.buffers.append(session_id, Role::Thought, &delta).flush {
                    outputs.push(Output::Flush(flush));
                }
                Ok(outputs)
            }

            RuntimeEvent::ToolSelectDelta { vendor, partial } => {
                Ok(vec![Output::Wire(Event::ToolSelectDelta {
                    stamp: self.subsessions.stamp(Role::Assistant),
                    vendor,
                    partial,
                })])
            }

            RuntimeEvent::ToolCall(call) => Ok(vec![Output::Wire(Event::ToolCall {
                stamp: self.subsessions.stamp(Role::Assistant),
                call,
                active: true,
                result: None,
            })]),

            RuntimeEvent::ToolResult { call, result } => Ok(vec![Output::Wire(Event::ToolCall {
                stamp: self.subsessions.stamp(Role::Assistant),
                call,
                active: false,
                result: Some(result),
            })]),

            RuntimeEvent::SubsessionBegin {
                kind,
                agent_role,
                sub_agent_key,
            } => {
                let prime = self.subsessions.current().agent_key.clone();
                let (handle, outputs) =
                    self.begin_subsession(kind, agent_role, &prime, &sub_agent_key)?;
                self.open_handles.push(handle);
                Ok(outputs)
            }

            RuntimeEvent::SubsessionEnd => {
                let handle = self.open_handles.pop().ok_or_else(|| {
                    ProtocolError::Violation(
                        "subsession end without a matching start".to_string(),
                    )
                })?;
                self.end_subsession(&handle)
            }

            RuntimeEvent::Completed { stop_reason } => {
                let session_id = self.subsessions.current().id;
                let mut outputs = Vec::new();
                for flush in self.buffers.finish(session_id) {
                    outputs.push(Output::Flush(flush));
                }
                outputs.push(Output::Wire(Event::Completion {
                    stamp: self.subsessions.stamp(Role::Assistant),
                    stop_reason,
                }));
                if self.subsessions.depth() == 0 && !self.transcript.is_empty() {
                    outputs.push(Output::Wire(Event::HistoryDelta {
                        stamp: self.subsessions.stamp(Role::Assistant),
                        content: std::mem::take(&mut self.transcript),
                    }));
                }
                Ok(outputs)
            }

            RuntimeEvent::InteractionEnded => {
                let session_id = self.subsessions.current().id;
                let mut outputs = Vec::new();
                // Whichever of completion-end / interaction-end comes first
                // drains the buffers; this one is a no-op if both arrive.
                for flush in self.buffers.finish(session_id) {
                    outputs.push(Output::Flush(flush));
                }
                if self.subsessions.depth() == 0 {
                    self.turn.note_interaction_end();
                }
                outputs.push(Output::Wire(Event::InteractionEnd {
                    stamp: self.subsessions.stamp(Role::Assistant),
                }));
                Ok(outputs)
            }

            RuntimeEvent::Failed(message) => Ok(vec![Output::Wire(Event::Error {
                code: ErrorCode::RuntimeFailure,
                message,
            })]),
        }
    }

    /// Opens a subsession under the current context. See
    /// [`SubsessionManager::begin`] for stamping rules.
    pub fn begin_subsession(
        &mut self,
        kind: SubsessionKind,
        agent_role: AgentRole,
        prime_agent_key: &str,
        sub_agent_key: &str,
    ) -> Result<(SubsessionHandle, Vec<Output>), ProtocolError> {
        let (handle, event) =
            self.subsessions
                .begin(kind, agent_role, prime_agent_key, sub_agent_key)?;
        Ok((handle, vec![Output::Wire(event)]))
    }

    /// Closes a subsession, force-flushing anything it still had buffered.
    pub fn end_subsession(
        &mut self,
        handle: &SubsessionHandle,
    ) -> Result<Vec<Output>, ProtocolError> {
        let mut outputs = Vec::new();
        for flush in self.buffers.finish(handle.session_id()) {
            outputs.push(Output::Flush(flush));
        }
        let event = self.subsessions.end(handle)?;
        outputs.push(Output::Wire(event));
        Ok(outputs)
    }

    /// The explicit turn-resume signal. The coordinator calls this only
    /// after the root interaction ended *and* its buffers flushed.
    pub fn resume_turn(&mut self) -> Result<Event, ProtocolError> {
        self.turn.resume()?;
        Ok(Event::TurnStart)
    }

    /// Timeout-policy hook: forcibly returns the turn to the client.
    pub fn force_resume_turn(&mut self) -> Event {
        self.turn.force_resume();
        Event::TurnStart
    }

    /// Connection close: discards pending buffers and verifies every
    /// subsession start was matched. An unbalanced stack is fatal and
    /// reported, never silently dropped.
    pub fn close(mut self) -> Result<(), ProtocolError> {
        self.buffers.discard();
        self.subsessions.close()
    }
}
