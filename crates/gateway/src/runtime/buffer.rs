//! Server-side stream buffers — one sequenced chunk list per session.
//!
//! The agent loop is the single writer; resume snapshots are
//! multi-reader. After a turn finishes the buffer survives for a grace
//! window so an immediately reconnecting client can still fetch the
//! final state, then an eviction task removes it. A new turn for the
//! same session bumps the entry generation, which invalidates any
//! pending eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pal_domain::chunk::{StreamChunk, StreamState};
use pal_domain::key::SessionKey;

#[derive(Default)]
struct BufferEntry {
    is_processing: bool,
    current_prompt: Option<String>,
    current_sender_id: Option<String>,
    current_message_id: Option<String>,
    chunks: Vec<StreamChunk>,
    /// Bumped by `begin`; eviction tasks bail when it moved.
    generation: u64,
}

impl BufferEntry {
    fn snapshot(&self) -> StreamState {
        StreamState {
            is_processing: self.is_processing,
            current_prompt: self.current_prompt.clone(),
            current_sender_id: self.current_sender_id.clone(),
            current_message_id: self.current_message_id.clone(),
            chunks: self.chunks.clone(),
        }
    }
}

pub struct StreamBuffers {
    /// Shared with eviction tasks, which may outlive the caller.
    entries: Arc<Mutex<HashMap<SessionKey, BufferEntry>>>,
    grace: Duration,
}

impl StreamBuffers {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            grace,
        }
    }

    /// Start buffering a new turn for `key`.
    pub fn begin(&self, key: &SessionKey, prompt: &str, sender_id: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_default();
        entry.is_processing = true;
        entry.current_prompt = Some(prompt.to_owned());
        entry.current_sender_id = Some(sender_id.to_owned());
        entry.current_message_id = None;
        entry.chunks.clear();
        entry.generation += 1;
    }

    /// Append an already-sequenced chunk.
    pub fn append(&self, key: &SessionKey, chunk: StreamChunk) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_default();
        if let Some(id) = &chunk.message_id {
            entry.current_message_id = Some(id.clone());
        }
        entry.chunks.push(chunk);
    }

    /// Mark the turn finished and schedule eviction after the grace
    /// window (deferred so an immediate reconnect can still resume).
    pub fn finish(&self, key: &SessionKey) {
        let generation = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            entry.is_processing = false;
            entry.generation
        };

        let entries = self.entries.clone();
        let key = key.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut entries = entries.lock();
            if let Some(entry) = entries.get(&key) {
                if !entry.is_processing && entry.generation == generation {
                    entries.remove(&key);
                    tracing::debug!(key = %key, "stream buffer evicted");
                }
            }
        });
    }

    /// Current stream state for a session, if buffered.
    pub fn snapshot(&self, key: &SessionKey) -> Option<StreamState> {
        self.entries.lock().get(key).map(BufferEntry::snapshot)
    }

    /// Stream state looked up by thread id (the resume endpoint's
    /// handle on a conversation).
    pub fn snapshot_by_thread(&self, thread_id: i64) -> Option<StreamState> {
        self.entries
            .lock()
            .iter()
            .find(|(key, _)| key.thread_id == thread_id)
            .map(|(_, entry)| entry.snapshot())
    }

    /// Drop a session's buffer immediately.
    pub fn clear(&self, key: &SessionKey) {
        self.entries.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use pal_domain::chunk::ChunkPayload;
    use pal_domain::prompt::Source;

    use super::*;

    fn key() -> SessionKey {
        SessionKey::new(1, 7, "a")
    }

    fn chunk(seq: u64, payload: ChunkPayload, message_id: Option<&str>) -> StreamChunk {
        StreamChunk {
            sequence: seq,
            message_id: message_id.map(Into::into),
            payload,
            source: Source::WebUi,
        }
    }

    #[test]
    fn begin_append_snapshot() {
        let buffers = StreamBuffers::new(Duration::from_secs(10));
        buffers.begin(&key(), "hello", "alice");
        buffers.append(&key(), chunk(0, ChunkPayload::Content { delta: "Hi".into() }, Some("m1")));
        buffers.append(
            &key(),
            chunk(1, ChunkPayload::Content { delta: " there".into() }, Some("m1")),
        );

        let snap = buffers.snapshot(&key()).unwrap();
        assert!(snap.is_processing);
        assert_eq!(snap.current_prompt.as_deref(), Some("hello"));
        assert_eq!(snap.current_sender_id.as_deref(), Some("alice"));
        assert_eq!(snap.current_message_id.as_deref(), Some("m1"));
        assert_eq!(snap.chunks.len(), 2);
        assert_eq!(snap.chunks[0].sequence, 0);
    }

    #[test]
    fn begin_resets_previous_turn() {
        let buffers = StreamBuffers::new(Duration::from_secs(10));
        buffers.begin(&key(), "one", "alice");
        buffers.append(&key(), chunk(0, ChunkPayload::Terminal, None));
        buffers.begin(&key(), "two", "alice");

        let snap = buffers.snapshot(&key()).unwrap();
        assert!(snap.chunks.is_empty());
        assert_eq!(snap.current_prompt.as_deref(), Some("two"));
    }

    #[test]
    fn snapshot_by_thread_matches_key() {
        let buffers = StreamBuffers::new(Duration::from_secs(10));
        buffers.begin(&key(), "q", "alice");
        assert!(buffers.snapshot_by_thread(7).is_some());
        assert!(buffers.snapshot_by_thread(8).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_evicts_after_grace() {
        let buffers = Arc::new(StreamBuffers::new(Duration::from_secs(10)));
        buffers.begin(&key(), "q", "alice");
        buffers.finish(&key());

        // Inside the grace window the final buffer is still there.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let snap = buffers.snapshot(&key()).unwrap();
        assert!(!snap.is_processing);

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(buffers.snapshot(&key()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_turn_cancels_pending_eviction() {
        let buffers = Arc::new(StreamBuffers::new(Duration::from_secs(10)));
        buffers.begin(&key(), "one", "alice");
        buffers.finish(&key());

        tokio::time::sleep(Duration::from_secs(5)).await;
        buffers.begin(&key(), "two", "alice");

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        // The stale eviction fired but the generation had moved on.
        let snap = buffers.snapshot(&key()).unwrap();
        assert_eq!(snap.current_prompt.as_deref(), Some("two"));
    }
}
