//! Turn-taking for the external client.
//!
//! Exactly one party may emit conversational content at a time. This machine
//! is scoped to the root connection and is deliberately blind to subsession
//! depth: nested agent collaboration never changes whether the external
//! client may speak.
//!
//! `interaction_end` and the turn-resume signal are separate on purpose.
//! History finalization and completion bookkeeping happen after the agent
//! stops talking but before the client may interrupt; collapsing the two
//! signals lets a fast client race that bookkeeping.

use crate::error::ProtocolError;

/// Who currently holds the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// The client may submit input. Initial state once connection
    /// initialization has completed.
    AwaitingUserInput,
    /// The agent pipeline holds the turn; client input is rejected.
    AgentProcessing,
}

#[derive(Debug)]
pub struct TurnMachine {
    state: TurnState,
    /// Set once the root interaction's terminal lifecycle event was seen;
    /// gates `resume`.
    end_seen: bool,
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            state: TurnState::AwaitingUserInput,
            end_seen: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Admits client input, taking the turn for the agent pipeline.
    pub fn accept_input(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            TurnState::AwaitingUserInput => {
                self.state = TurnState::AgentProcessing;
                self.end_seen = false;
                Ok(())
            }
            TurnState::AgentProcessing => Err(ProtocolError::OutOfTurn),
        }
    }

    /// Root interaction-start. Side effect only: processing already began
    /// when the input was accepted.
    pub fn note_interaction_start(&mut self) {
        self.end_seen = false;
    }

    /// Root interaction-end. No transition by itself; it merely makes
    /// `resume` legal.
    pub fn note_interaction_end(&mut self) {
        self.end_seen = true;
    }

    /// The explicit turn-resume signal, legal only after interaction-end.
    /// The coordinator additionally waits for pending buffers to flush
    /// before calling this.
    pub fn resume(&mut self) -> Result<(), ProtocolError> {
        if self.state != TurnState::AgentProcessing || !self.end_seen {
            return Err(ProtocolError::Violation(
                "turn resumed without a terminal interaction event".to_string(),
            ));
        }
        self.state = TurnState::AwaitingUserInput;
        self.end_seen = false;
        Ok(())
    }

    /// Hook for an external timeout policy: forces the turn back to the
    /// client unconditionally.
    pub fn force_resume(&mut self) {
        self.state = TurnState::AwaitingUserInput;
        self.end_seen = false;
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}
