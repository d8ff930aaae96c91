//! Cadence protocol core.
//!
//! Transport-free building blocks for a single long-lived, bidirectional
//! event stream shared by a client and a set of dynamically nested agent
//! execution contexts: the tagged event envelope, session hierarchy
//! tracking, subsession lifecycle bracketing, turn-taking, vendor-tagged
//! tool payloads and sentence-level delta buffering, composed per connection
//! by [`conversation::Conversation`]. The `cadence-api` service owns the
//! actual sockets and drives this crate.

pub mod conversation;
pub mod delta;
pub mod error;
pub mod event;
pub mod hierarchy;
pub mod subsession;
pub mod tool;
pub mod turn;
