//! In-process transport.
//!
//! Backs the web UI (the HTTP layer pushes prompts in and subscribers
//! consume chunks over a broadcast channel), the CLI chat mode, and
//! bot bindings whose wire layer lives outside the runtime.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use pal_domain::chunk::StreamChunk;
use pal_domain::error::{Error, Result};
use pal_domain::key::SessionKey;
use pal_domain::prompt::{PromptEnvelope, Source};

use super::ChatTransport;

const OUTBOUND_CAPACITY: usize = 1024;

pub struct LocalTransport {
    source: Source,
    default_agent: String,
    supports_scheduled: bool,
    prompt_tx: mpsc::Sender<PromptEnvelope>,
    prompt_rx: tokio::sync::Mutex<mpsc::Receiver<PromptEnvelope>>,
    outbound: broadcast::Sender<(SessionKey, StreamChunk)>,
    topics: Mutex<HashSet<SessionKey>>,
    next_conversation: AtomicI64,
    next_thread: AtomicI64,
    sequence: AtomicU64,
}

impl LocalTransport {
    pub fn new(source: Source, default_agent: impl Into<String>, supports_scheduled: bool) -> Self {
        let (prompt_tx, prompt_rx) = mpsc::channel(256);
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            source,
            default_agent: default_agent.into(),
            supports_scheduled,
            prompt_tx,
            prompt_rx: tokio::sync::Mutex::new(prompt_rx),
            outbound,
            topics: Mutex::new(HashSet::new()),
            next_conversation: AtomicI64::new(1),
            next_thread: AtomicI64::new(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Push a prompt into the runtime. The envelope's ids should come
    /// from [`ChatTransport::create_topic_if_needed`]; the transport
    /// stamps its source and per-transport sequence.
    pub async fn submit(&self, mut envelope: PromptEnvelope) -> Result<()> {
        envelope.source = self.source;
        envelope.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.prompt_tx
            .send(envelope)
            .await
            .map_err(|_| Error::Transport("local transport closed".into()))
    }

    /// Subscribe to the chunks routed to this transport.
    pub fn subscribe(&self) -> broadcast::Receiver<(SessionKey, StreamChunk)> {
        self.outbound.subscribe()
    }
}

#[async_trait::async_trait]
impl ChatTransport for LocalTransport {
    fn source(&self) -> Source {
        self.source
    }

    async fn read_prompt(
        &self,
        timeout: Duration,
        ct: &CancellationToken,
    ) -> Result<Option<PromptEnvelope>> {
        let mut rx = self.prompt_rx.lock().await;
        tokio::select! {
            _ = ct.cancelled() => Ok(None),
            next = tokio::time::timeout(timeout, rx.recv()) => match next {
                Err(_) => Ok(None), // timed out; let the caller re-check shutdown
                Ok(Some(envelope)) => Ok(Some(envelope)),
                Ok(None) => Err(Error::Transport("local transport closed".into())),
            },
        }
    }

    async fn deliver(&self, key: &SessionKey, chunk: StreamChunk) -> Result<()> {
        // No subscribers is fine: the dashboard may not be open.
        let _ = self.outbound.send((key.clone(), chunk));
        Ok(())
    }

    async fn create_topic_if_needed(
        &self,
        conversation_id: Option<i64>,
        thread_id: Option<i64>,
        agent_id: Option<&str>,
        _name: Option<&str>,
    ) -> Result<SessionKey> {
        let agent = agent_id.unwrap_or(&self.default_agent).to_owned();
        let conversation =
            conversation_id.unwrap_or_else(|| self.next_conversation.fetch_add(1, Ordering::Relaxed));
        let thread = thread_id.unwrap_or_else(|| self.next_thread.fetch_add(1, Ordering::Relaxed));
        let key = SessionKey::new(conversation, thread, agent);
        self.topics.lock().insert(key.clone());
        Ok(key)
    }

    async fn create_thread(
        &self,
        conversation_id: i64,
        _name: &str,
        agent_id: Option<&str>,
    ) -> Result<i64> {
        let thread = self.next_thread.fetch_add(1, Ordering::Relaxed);
        let agent = agent_id.unwrap_or(&self.default_agent).to_owned();
        self.topics
            .lock()
            .insert(SessionKey::new(conversation_id, thread, agent));
        Ok(thread)
    }

    async fn thread_exists(&self, key: &SessionKey) -> Result<bool> {
        Ok(self.topics.lock().contains(key))
    }

    fn supports_scheduled_notifications(&self) -> bool {
        self.supports_scheduled
    }
}

#[cfg(test)]
mod tests {
    use pal_domain::chunk::ChunkPayload;

    use super::*;

    #[tokio::test]
    async fn submit_then_read() {
        let transport = LocalTransport::new(Source::Cli, "jack", false);
        transport
            .submit(PromptEnvelope::new("hello", "alice", Source::Cli))
            .await
            .unwrap();

        let ct = CancellationToken::new();
        let envelope = transport
            .read_prompt(Duration::from_millis(50), &ct)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.prompt, "hello");
        assert_eq!(envelope.source, Source::Cli);
        assert_eq!(envelope.sequence, 0);
    }

    #[tokio::test]
    async fn read_times_out_quietly() {
        let transport = LocalTransport::new(Source::WebUi, "jack", true);
        let ct = CancellationToken::new();
        let next = transport
            .read_prompt(Duration::from_millis(10), &ct)
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn read_honors_cancellation() {
        let transport = LocalTransport::new(Source::WebUi, "jack", true);
        let ct = CancellationToken::new();
        ct.cancel();
        let next = transport
            .read_prompt(Duration::from_secs(60), &ct)
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn deliver_reaches_subscribers() {
        let transport = LocalTransport::new(Source::WebUi, "jack", true);
        let mut rx = transport.subscribe();

        let key = SessionKey::new(1, 1, "jack");
        let chunk = StreamChunk {
            sequence: 0,
            message_id: None,
            payload: ChunkPayload::Content { delta: "hi".into() },
            source: Source::WebUi,
        };
        transport.deliver(&key, chunk.clone()).await.unwrap();

        let (got_key, got_chunk) = rx.recv().await.unwrap();
        assert_eq!(got_key, key);
        assert_eq!(got_chunk, chunk);
    }

    #[tokio::test]
    async fn topic_allocation_tracks_existence() {
        let transport = LocalTransport::new(Source::WebUi, "jack", true);
        let key = transport
            .create_topic_if_needed(None, None, None, Some("general"))
            .await
            .unwrap();
        assert_eq!(key.agent_id, "jack");
        assert!(transport.thread_exists(&key).await.unwrap());

        let thread = transport
            .create_thread(key.conversation_id, "side quest", None)
            .await
            .unwrap();
        let side = SessionKey::new(key.conversation_id, thread, "jack");
        assert!(transport.thread_exists(&side).await.unwrap());
        assert!(
            !transport
                .thread_exists(&SessionKey::new(99, 99, "jack"))
                .await
                .unwrap()
        );
    }
}
