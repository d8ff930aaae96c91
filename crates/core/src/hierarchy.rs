//! Session hierarchy tracking for nested execution contexts.
//!
//! Contexts form a strict tree over the lifetime of a connection, but the
//! tracker only ever holds the *active path* from the root user session to
//! the currently-emitting context. Siblings are not retained once their
//! subtree ends, so memory is O(depth), and stamping an event is a read of
//! the stack top plus the cached root id.

use crate::error::ProtocolError;
use crate::event::{AgentRole, Role, SessionStamp, SubsessionKind};
use uuid::Uuid;

/// Metadata supplied when a new context is entered.
#[derive(Debug, Clone)]
pub struct ContextMeta {
    pub kind: SubsessionKind,
    pub agent_role: AgentRole,
    /// The agent that owns the new context.
    pub agent_key: String,
}

/// One node on the active path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub id: Uuid,
    /// `None` for the root user session.
    pub parent_id: Option<Uuid>,
    pub root_id: Uuid,
    /// Root = 0.
    pub depth: usize,
    /// Classification pair; `None` on the root, which is not a subsession.
    pub kind: Option<SubsessionKind>,
    pub agent_role: Option<AgentRole>,
    pub agent_key: String,
}

/// The active-path stack from the root user session to the current context.
#[derive(Debug)]
pub struct HierarchyTracker {
    stack: Vec<SessionContext>,
    /// Cached so `stamp` never walks to the stack base.
    root_id: Uuid,
}

impl HierarchyTracker {
    /// Creates a tracker whose root is a fresh user session owned by
    /// `agent_key`.
    pub fn new(agent_key: impl Into<String>) -> Self {
        let root_id = Uuid::new_v4();
        let root = SessionContext {
            id: root_id,
            parent_id: None,
            root_id,
            depth: 0,
            kind: None,
            agent_role: None,
            agent_key: agent_key.into(),
        };
        Self {
            stack: vec![root],
            root_id,
        }
    }

    /// Pushes a new context under the current one and returns it.
    pub fn enter(&mut self, meta: ContextMeta) -> &SessionContext {
        let parent_id = self.current().id;
        let depth = self.stack.len();
        self.stack.push(SessionContext {
            id: Uuid::new_v4(),
            parent_id: Some(parent_id),
            root_id: self.root_id,
            depth,
            kind: Some(meta.kind),
            agent_role: Some(meta.agent_role),
            agent_key: meta.agent_key,
        });
        self.current()
    }

    /// Pops the top frame, verifying that `session_id` names it.
    ///
    /// A mismatch means brackets crossed somewhere upstream; that is fatal
    /// because every stamp after it would be mis-attributed.
    pub fn leave(&mut self, session_id: Uuid) -> Result<SessionContext, ProtocolError> {
        let top = self.current();
        if top.depth == 0 {
            return Err(ProtocolError::Violation(format!(
                "attempted to leave the root user session {session_id}"
            )));
        }
        if top.id != session_id {
            return Err(ProtocolError::Violation(format!(
                "mismatched subsession bracket: tried to leave {session_id} but the active context is {}",
                top.id
            )));
        }
        // Unwrap is safe: depth 0 was rejected above, so the stack has >= 2 frames.
        Ok(self.stack.pop().unwrap())
    }

    /// Stamps for the currently-emitting context.
    pub fn stamp(&self, role: Role) -> SessionStamp {
        self.stamp_for(self.current(), role)
    }

    /// Stamps for an explicit context, used for out-of-band replay.
    pub fn stamp_for(&self, ctx: &SessionContext, role: Role) -> SessionStamp {
        SessionStamp {
            session_id: ctx.id,
            parent_session_id: ctx.parent_id,
            user_session_id: self.root_id,
            role,
        }
    }

    pub fn current(&self) -> &SessionContext {
        // The root frame is never popped, so the stack is never empty.
        self.stack.last().expect("hierarchy stack holds the root")
    }

    /// Current nesting depth (root = 0).
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    pub fn root_id(&self) -> Uuid {
        self.root_id
    }

    /// True when only the root remains on the active path.
    pub fn is_balanced(&self) -> bool {
        self.stack.len() == 1
    }

    /// Ids of every context still open below the root, innermost last.
    pub fn open_contexts(&self) -> Vec<Uuid> {
        self.stack.iter().skip(1).map(|c| c.id).collect()
    }
}
