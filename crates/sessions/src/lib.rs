//! Session management: per-conversation contexts, conversation logs,
//! cancellation scopes, and the registry that owns them.
//!
//! One [`SessionContext`] exists per `(conversation, thread, agent)`
//! key at any time; the [`SessionRegistry`] serializes creation per
//! key and guarantees disposal cancels the session scope exactly once.

pub mod log;
pub mod registry;
pub mod session;

pub use log::ConversationLog;
pub use registry::SessionRegistry;
pub use session::{SessionContext, SessionPhase};
