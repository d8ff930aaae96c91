//! Subsession lifecycle management.
//!
//! A subsession is a nested agent-to-agent conversation multiplexed onto the
//! parent's connection. The manager brackets each one with
//! `subsession_start` / `subsession_end` events, keeps the hierarchy tracker
//! in step, and enforces the invariant that every start is matched by
//! exactly one end before the parent ends or the connection closes.

use crate::error::ProtocolError;
use crate::event::{AgentRole, Event, Role, SubsessionKind};
use crate::hierarchy::{ContextMeta, HierarchyTracker, SessionContext};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Default nesting cap. Runaway delegation is a real failure mode of agent
/// systems; fail fast with a diagnosable error instead of overflowing.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Scopes calls against one live subsession. Using a handle after its
/// subsession ended fails with a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsessionHandle {
    id: Uuid,
}

impl SubsessionHandle {
    /// The child context's session id.
    pub fn session_id(&self) -> Uuid {
        self.id
    }
}

/// Owns the hierarchy tracker and the set of live subsession handles for one
/// connection.
#[derive(Debug)]
pub struct SubsessionManager {
    tracker: HierarchyTracker,
    max_depth: usize,
    live: HashSet<Uuid>,
}

impl SubsessionManager {
    pub fn new(agent_key: impl Into<String>, max_depth: usize) -> Self {
        Self {
            tracker: HierarchyTracker::new(agent_key),
            max_depth,
            live: HashSet::new(),
        }
    }

    /// Opens a subsession under the current context.
    ///
    /// The returned `subsession_start` event is stamped with the *parent's*
    /// triple: logically the start belongs to the parent, because the child
    /// context does not exist until the event is observed.
    pub fn begin(
        &mut self,
        kind: SubsessionKind,
        agent_role: AgentRole,
        prime_agent_key: &str,
        sub_agent_key: &str,
    ) -> Result<(SubsessionHandle, Event), ProtocolError> {
        if self.tracker.depth() + 1 > self.max_depth {
            return Err(ProtocolError::DepthLimitExceeded(self.max_depth));
        }

        let parent_stamp = self.tracker.stamp(Role::Assistant);
        let child = self.tracker.enter(ContextMeta {
            kind,
            agent_role,
            agent_key: sub_agent_key.to_string(),
        });
        let child_id = child.id;
        self.live.insert(child_id);
        debug!(subsession_id = %child_id, depth = child.depth, sub_agent = %sub_agent_key, "Subsession opened");

        let event = Event::SubsessionStart {
            stamp: parent_stamp,
            subsession_id: child_id,
            kind,
            agent_role,
            prime_agent_key: prime_agent_key.to_string(),
            sub_agent_key: sub_agent_key.to_string(),
        };
        Ok((SubsessionHandle { id: child_id }, event))
    }

    /// Closes the subsession scoped by `handle`.
    ///
    /// The `subsession_end` event is stamped with the parent triple restored
    /// after the pop. Ending a handle that is not the innermost open
    /// subsession, or one that already ended, is a protocol violation.
    pub fn end(&mut self, handle: &SubsessionHandle) -> Result<Event, ProtocolError> {
        if !self.live.contains(&handle.id) {
            return Err(ProtocolError::Violation(format!(
                "subsession handle {} is no longer valid",
                handle.id
            )));
        }
        self.tracker.leave(handle.id)?;
        self.live.remove(&handle.id);
        debug!(subsession_id = %handle.id, depth = self.tracker.depth(), "Subsession closed");

        Ok(Event::SubsessionEnd {
            stamp: self.tracker.stamp(Role::Assistant),
            subsession_id: handle.id,
        })
    }

    /// Close-time bracket check. Unmatched starts are a fatal protocol
    /// violation, never silently dropped.
    pub fn close(&self) -> Result<(), ProtocolError> {
        if self.tracker.is_balanced() {
            return Ok(());
        }
        let open: Vec<String> = self
            .tracker
            .open_contexts()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        Err(ProtocolError::Violation(format!(
            "connection closed with unmatched subsession starts: [{}]",
            open.join(", ")
        )))
    }

    pub fn stamp(&self, role: Role) -> crate::event::SessionStamp {
        self.tracker.stamp(role)
    }

    pub fn current(&self) -> &SessionContext {
        self.tracker.current()
    }

    pub fn depth(&self) -> usize {
        self.tracker.depth()
    }

    pub fn root_id(&self) -> Uuid {
        self.tracker.root_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SubsessionManager {
        SubsessionManager::new("prime", DEFAULT_MAX_DEPTH)
    }

    #[test]
    fn start_is_stamped_with_the_parent_triple() {
        let mut mgr = manager();
        let root = mgr.root_id();

        let (handle, event) = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Specialist, "prime", "reviewer")
            .unwrap();

        let stamp = event.stamp().unwrap();
        assert_eq!(stamp.session_id, root);
        assert_eq!(stamp.parent_session_id, None);
        // But the child context is now the emitter for subsequent events.
        assert_eq!(mgr.current().id, handle.session_id());
        assert_ne!(handle.session_id(), root);
    }

    #[test]
    fn end_is_stamped_with_the_restored_parent_triple() {
        let mut mgr = manager();
        let root = mgr.root_id();
        let (handle, _) = mgr
            .begin(SubsessionKind::OneShot, AgentRole::ToolExecutor, "prime", "runner")
            .unwrap();

        let event = mgr.end(&handle).unwrap();
        let stamp = event.stamp().unwrap();
        assert_eq!(stamp.session_id, root);
        match event {
            Event::SubsessionEnd { subsession_id, .. } => {
                assert_eq!(subsession_id, handle.session_id());
            }
            other => panic!("expected subsession_end, got {}", other.kind()),
        }
    }

    #[test]
    fn a_spent_handle_cannot_be_reused() {
        let mut mgr = manager();
        let (handle, _) = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Clone, "prime", "twin")
            .unwrap();
        mgr.end(&handle).unwrap();

        let err = mgr.end(&handle).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn ending_a_non_top_handle_is_a_violation() {
        let mut mgr = manager();
        let (outer, _) = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Specialist, "prime", "a")
            .unwrap();
        let (inner, _) = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Specialist, "a", "b")
            .unwrap();

        let err = mgr.end(&outer).unwrap_err();
        assert!(err.is_fatal());
        // The inner subsession is untouched and can still end cleanly.
        mgr.end(&inner).unwrap();
        mgr.end(&outer).unwrap();
        assert!(mgr.close().is_ok());
    }

    #[test]
    fn depth_limit_rejects_the_offending_start_only() {
        let mut mgr = SubsessionManager::new("prime", 2);
        let (_a, _) = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Specialist, "prime", "a")
            .unwrap();
        let (_b, _) = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Specialist, "a", "b")
            .unwrap();

        let err = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Specialist, "b", "c")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DepthLimitExceeded(2)));
        assert!(!err.is_fatal());
        // The parent context is still the previous top; nothing was pushed.
        assert_eq!(mgr.depth(), 2);
    }

    #[test]
    fn unmatched_start_at_close_is_fatal() {
        let mut mgr = manager();
        let (_handle, _) = mgr
            .begin(SubsessionKind::Interactive, AgentRole::Specialist, "prime", "a")
            .unwrap();

        let err = mgr.close().unwrap_err();
        assert!(err.is_fatal());
    }
}
