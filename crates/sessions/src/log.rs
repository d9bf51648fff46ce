//! Append-only conversation log.
//!
//! Messages are immutable once appended; readers get an owned snapshot
//! so the turn loop can hold it across await points without the lock.

use parking_lot::Mutex;

use pal_domain::message::ChatMessage;

#[derive(Default)]
pub struct ConversationLog {
    messages: Mutex<Vec<ChatMessage>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single message.
    pub fn append(&self, message: ChatMessage) {
        self.messages.lock().push(message);
    }

    /// Append several messages atomically (e.g. a tool-result batch).
    pub fn append_all(&self, batch: impl IntoIterator<Item = ChatMessage>) {
        self.messages.lock().extend(batch);
    }

    /// An immutable copy of the log at this instant.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_snapshot() {
        let log = ConversationLog::new();
        log.append(ChatMessage::user("hi"));
        log.append(ChatMessage::assistant("hello"));

        let snap = log.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].content, "hi");
        assert_eq!(snap[1].content, "hello");
    }

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let log = ConversationLog::new();
        log.append(ChatMessage::user("one"));
        let snap = log.snapshot();
        log.append(ChatMessage::user("two"));

        assert_eq!(snap.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn append_all_is_ordered() {
        let log = ConversationLog::new();
        log.append_all([
            ChatMessage::tool_result("c1", "a"),
            ChatMessage::tool_result("c2", "b"),
        ]);
        let snap = log.snapshot();
        assert_eq!(snap[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(snap[1].tool_call_id.as_deref(), Some("c2"));
    }
}
