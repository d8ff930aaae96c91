//! Delta buffering for the speech side-channel.
//!
//! Raw deltas always reach the primary client unmodified; buffering is only
//! visible to the side-channel consumer, which wants sentence-sized units
//! rather than token fragments. A buffer is kept per (session, role) and
//! flushed at the last newline seen, or force-flushed when the owning
//! interaction terminates; a partial sentence beats a dropped one.

use crate::event::Role;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Outcome of appending one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Buffered text ready for the side-channel, up to and including the
    /// last newline. `None` while a sentence is still accumulating.
    pub flush: Option<String>,
}

/// Per-(session, role) accumulators of pending side-channel text.
#[derive(Debug, Default)]
pub struct DeltaBuffers {
    // Ordered map so forced end-of-interaction flushes are deterministic.
    buffers: BTreeMap<(Uuid, Role), String>,
    /// Sessions whose first thought delta already fired the engagement hook.
    engaged: HashSet<Uuid>,
}

impl DeltaBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and splits off a flush unit if it completed a line.
    ///
    /// The remainder after the last newline stays buffered for the next call.
    pub fn append(&mut self, session_id: Uuid, role: Role, fragment: &str) -> AppendOutcome {
        let key = (session_id, role);
        let buf = self.buffers.entry(key).or_default();
        buf.push_str(fragment);

        let flush = if fragment.contains('\n') {
            // The buffer contains at least the fragment's newline.
            let split = buf.rfind('\n').map_or(buf.len(), |i| i + 1);
            let rest = buf.split_off(split);
            Some(std::mem::replace(buf, rest))
        } else {
            None
        };
        if self.buffers.get(&key).is_some_and(String::is_empty) {
            self.buffers.remove(&key);
        }
        AppendOutcome { flush }
    }

    /// Force-flushes everything buffered for a session, in role order, and
    /// re-arms its engagement hook. Called on interaction or completion end;
    /// idempotent.
    pub fn finish(&mut self, session_id: Uuid) -> Vec<String> {
        let keys: Vec<(Uuid, Role)> = self
            .buffers
            .keys()
            .filter(|(id, _)| *id == session_id)
            .cloned()
            .collect();
        self.engaged.remove(&session_id);
        keys.into_iter()
            .filter_map(|key| self.buffers.remove(&key))
            .filter(|text| !text.is_empty())
            .collect()
    }

    /// One-shot engagement hook: true exactly once per session between
    /// resets, on its first thought delta.
    pub fn first_thought(&mut self, session_id: Uuid) -> bool {
        self.engaged.insert(session_id)
    }

    /// Drops all pending buffers, e.g. on client disconnect.
    pub fn discard(&mut self) {
        self.buffers.clear();
        self.engaged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_at_the_last_newline_and_rebuffers_the_remainder() {
        let mut buffers = DeltaBuffers::new();
        let session = Uuid::new_v4();

        assert_eq!(buffers.append(session, Role::Assistant, "Hello, ").flush, None);
        let out = buffers.append(session, Role::Assistant, "world!\nNext sen");
        assert_eq!(out.flush.as_deref(), Some("Hello, world!\n"));

        // The remainder stays buffered and comes out on the forced flush.
        assert_eq!(buffers.finish(session), vec!["Next sen".to_string()]);
    }

    #[test]
    fn fragment_with_multiple_newlines_flushes_through_the_last_one() {
        let mut buffers = DeltaBuffers::new();
        let session = Uuid::new_v4();

        let out = buffers.append(session, Role::Assistant, "one\ntwo\nthr");
        assert_eq!(out.flush.as_deref(), Some("one\ntwo\n"));
        assert_eq!(buffers.finish(session), vec!["thr".to_string()]);
    }

    #[test]
    fn buffers_are_independent_per_session_and_role() {
        let mut buffers = DeltaBuffers::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        buffers.append(a, Role::Assistant, "visible");
        buffers.append(a, Role::Thought, "silent");
        buffers.append(b, Role::Assistant, "other");

        assert_eq!(buffers.finish(a).len(), 2);
        assert_eq!(buffers.finish(b), vec!["other".to_string()]);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut buffers = DeltaBuffers::new();
        let session = Uuid::new_v4();
        buffers.append(session, Role::Assistant, "tail");

        assert_eq!(buffers.finish(session).len(), 1);
        assert!(buffers.finish(session).is_empty());
    }

    #[test]
    fn flush_units_reconstruct_the_fragment_stream_exactly() {
        let fragments = ["Strea", "ming is\nhard", "er than\nit", " looks"];
        let mut buffers = DeltaBuffers::new();
        let session = Uuid::new_v4();

        let mut emitted = String::new();
        for fragment in fragments {
            if let Some(flush) = buffers.append(session, Role::Assistant, fragment).flush {
                emitted.push_str(&flush);
            }
        }
        for flush in buffers.finish(session) {
            emitted.push_str(&flush);
        }
        assert_eq!(emitted, fragments.concat());
    }

    #[test]
    fn first_thought_fires_once_until_reset() {
        let mut buffers = DeltaBuffers::new();
        let session = Uuid::new_v4();

        assert!(buffers.first_thought(session));
        assert!(!buffers.first_thought(session));

        buffers.finish(session);
        assert!(buffers.first_thought(session));
    }
}
