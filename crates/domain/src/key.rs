use serde::{Deserialize, Serialize};

/// The `(conversation, thread, agent)` triple that uniquely identifies
/// a session. Opaque to the runtime core; assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub conversation_id: i64,
    pub thread_id: i64,
    pub agent_id: String,
}

impl SessionKey {
    pub fn new(conversation_id: i64, thread_id: i64, agent_id: impl Into<String>) -> Self {
        Self {
            conversation_id,
            thread_id,
            agent_id: agent_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.conversation_id, self.thread_id, self.agent_id
        )
    }
}
