//! Message-queue transport.
//!
//! Speaks the bus envelope contract: inbound JSON objects with
//! required `correlationId`, `agentId`, `prompt`, `sender` fields, and
//! outbound `{correlationId, agentId, response, completedAt}` replies.
//! Invalid messages are dead-lettered with a reason instead of being
//! retried; response writes retry with exponential backoff. The broker
//! itself (Service Bus, AMQP, ...) is behind the [`MessageQueue`]
//! trait — wire encodings are not the runtime's business.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use pal_domain::chunk::{ChunkPayload, StreamChunk};
use pal_domain::error::{DeadLetterReason, Error, Result};
use pal_domain::key::SessionKey;
use pal_domain::persist::CorrelationStore;
use pal_domain::prompt::{PromptEnvelope, Source};

use super::ChatTransport;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receive the next raw payload; `Ok(None)` on timeout.
    async fn receive(&self, timeout: Duration) -> Result<Option<String>>;

    /// Write a response payload to the reply queue.
    async fn send(&self, payload: String) -> Result<()>;

    /// Move an unprocessable payload to the dead-letter queue.
    async fn dead_letter(&self, payload: String, reason: DeadLetterReason) -> Result<()>;
}

/// In-memory broker used by tests and the development server.
pub struct InMemoryQueue {
    inbound_tx: tokio::sync::mpsc::UnboundedSender<String>,
    inbound_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>,
    sent: Mutex<Vec<String>>,
    dead: Mutex<Vec<(String, DeadLetterReason)>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: Mutex::new(Vec::new()),
            dead: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue an inbound payload, as the broker would.
    pub fn push(&self, payload: impl Into<String>) {
        let _ = self.inbound_tx.send(payload.into());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn dead_lettered(&self) -> Vec<(String, DeadLetterReason)> {
        self.dead.lock().clone()
    }
}

#[async_trait::async_trait]
impl MessageQueue for InMemoryQueue {
    async fn receive(&self, timeout: Duration) -> Result<Option<String>> {
        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Ok(None),
            Ok(next) => Ok(next),
        }
    }

    async fn send(&self, payload: String) -> Result<()> {
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn dead_letter(&self, payload: String, reason: DeadLetterReason) -> Result<()> {
        self.dead.lock().push((payload, reason));
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundBusMessage<'a> {
    correlation_id: &'a str,
    agent_id: &'a str,
    response: &'a str,
    completed_at: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retry settings for response-queue writes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

struct CorrelationBinding {
    correlation_id: String,
    agent_id: String,
}

pub struct QueueTransport {
    queue: Arc<dyn MessageQueue>,
    known_agents: HashSet<String>,
    retry: RetryPolicy,
    correlation_store: Arc<dyn CorrelationStore>,
    /// correlation id → allocated session binding.
    bindings: Mutex<HashMap<String, SessionKey>>,
    /// session key → originating correlation/agent, for replies.
    reverse: Mutex<HashMap<SessionKey, Arc<CorrelationBinding>>>,
    /// Accumulated response text per in-flight session.
    pending: Mutex<HashMap<SessionKey, String>>,
    next_conversation: AtomicI64,
    sequence: AtomicU64,
}

impl QueueTransport {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        known_agents: HashSet<String>,
        retry: RetryPolicy,
        correlation_store: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            queue,
            known_agents,
            retry,
            correlation_store,
            bindings: Mutex::new(HashMap::new()),
            reverse: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_conversation: AtomicI64::new(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Validate a raw payload against the inbound contract. Returns
    /// the extracted `(correlationId, agentId, prompt, sender)`.
    fn parse_inbound(&self, raw: &str) -> std::result::Result<[String; 4], DeadLetterReason> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| DeadLetterReason::DeserializationError)?;

        let field = |name: &str| -> std::result::Result<String, DeadLetterReason> {
            match value.get(name).and_then(|v| v.as_str()) {
                Some(s) if !s.is_empty() => Ok(s.to_owned()),
                _ => Err(DeadLetterReason::MissingField),
            }
        };

        let correlation_id = field("correlationId")?;
        let agent_id = field("agentId")?;
        let prompt = field("prompt")?;
        let sender = field("sender")?;

        if !self.known_agents.contains(&agent_id) {
            return Err(DeadLetterReason::InvalidAgentId);
        }

        Ok([correlation_id, agent_id, prompt, sender])
    }

    /// Resolve or allocate the session binding for a correlation id.
    async fn bind(&self, correlation_id: &str, agent_id: &str) -> SessionKey {
        let (key, is_new) = {
            let mut bindings = self.bindings.lock();
            match bindings.get(correlation_id) {
                Some(key) => (key.clone(), false),
                None => {
                    let conversation = self.next_conversation.fetch_add(1, Ordering::Relaxed);
                    let key = SessionKey::new(conversation, conversation, agent_id);
                    bindings.insert(correlation_id.to_owned(), key.clone());
                    self.reverse.lock().insert(
                        key.clone(),
                        Arc::new(CorrelationBinding {
                            correlation_id: correlation_id.to_owned(),
                            agent_id: agent_id.to_owned(),
                        }),
                    );
                    (key, true)
                }
            }
        };

        if is_new {
            if let Err(e) = self.correlation_store.put(&key, correlation_id).await {
                tracing::warn!(error = %e, key = %key, "failed to persist correlation");
            }
        }
        key
    }

    /// Queue the outbound envelope on its own task so a slow broker
    /// never stalls chunk fan-out.
    fn respond(&self, key: &SessionKey, response: &str) {
        let binding = match self.reverse.lock().get(key) {
            Some(b) => b.clone(),
            None => {
                tracing::warn!(key = %key, "no correlation binding for response; dropping");
                return;
            }
        };
        let payload = match serde_json::to_string(&OutboundBusMessage {
            correlation_id: &binding.correlation_id,
            agent_id: &binding.agent_id,
            response,
            completed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound envelope");
                return;
            }
        };

        let queue = self.queue.clone();
        let retry = self.retry.clone();
        tokio::spawn(async move {
            send_with_retry(queue, retry, payload).await;
        });
    }
}

/// Write with exponential backoff; exhaustion is logged, never
/// bubbled — prompt processing continues regardless.
async fn send_with_retry(queue: Arc<dyn MessageQueue>, retry: RetryPolicy, payload: String) {
    for attempt in 0..retry.attempts {
        match queue.send(payload.clone()).await {
            Ok(()) => return,
            Err(e) if attempt + 1 < retry.attempts => {
                let delay = retry.base_delay * 2u32.pow(attempt);
                tracing::warn!(
                    error = %e,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    "response send failed; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "response send retries exhausted; giving up");
            }
        }
    }
}

#[async_trait::async_trait]
impl ChatTransport for QueueTransport {
    fn source(&self) -> Source {
        Source::ServiceBus
    }

    async fn read_prompt(
        &self,
        timeout: Duration,
        ct: &CancellationToken,
    ) -> Result<Option<PromptEnvelope>> {
        let raw = tokio::select! {
            _ = ct.cancelled() => return Ok(None),
            raw = self.queue.receive(timeout) => raw?,
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        let [correlation_id, agent_id, prompt, sender] = match self.parse_inbound(&raw) {
            Ok(fields) => fields,
            Err(reason) => {
                tracing::warn!(reason = %reason, "dead-lettering inbound bus message");
                self.queue.dead_letter(raw, reason).await?;
                return Ok(None);
            }
        };

        let key = self.bind(&correlation_id, &agent_id).await;
        Ok(Some(PromptEnvelope {
            prompt,
            conversation_id: Some(key.conversation_id),
            thread_id: Some(key.thread_id),
            agent_id: Some(key.agent_id.clone()),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            sender_id: sender,
            source: Source::ServiceBus,
        }))
    }

    async fn deliver(&self, key: &SessionKey, chunk: StreamChunk) -> Result<()> {
        match chunk.payload {
            ChunkPayload::Content { delta } => {
                self.pending.lock().entry(key.clone()).or_default().push_str(&delta);
            }
            ChunkPayload::Terminal => {
                let response = self.pending.lock().remove(key).unwrap_or_default();
                self.respond(key, &response);
            }
            ChunkPayload::Error { message } => {
                self.pending.lock().remove(key);
                self.respond(key, &message);
            }
            // Reasoning, tool-call, and approval chunks have no bus
            // representation.
            ChunkPayload::Reasoning { .. }
            | ChunkPayload::ToolCall { .. }
            | ChunkPayload::Approval { .. } => {}
        }
        Ok(())
    }

    async fn create_topic_if_needed(
        &self,
        conversation_id: Option<i64>,
        thread_id: Option<i64>,
        agent_id: Option<&str>,
        _name: Option<&str>,
    ) -> Result<SessionKey> {
        // Bus conversations are keyed by correlation id at read time;
        // explicit topic creation only echoes known ids back.
        match (conversation_id, thread_id, agent_id) {
            (Some(c), Some(t), Some(a)) => Ok(SessionKey::new(c, t, a)),
            _ => Err(Error::Transport(
                "queue transport cannot allocate topics out of band".into(),
            )),
        }
    }

    async fn create_thread(
        &self,
        _conversation_id: i64,
        _name: &str,
        _agent_id: Option<&str>,
    ) -> Result<i64> {
        Err(Error::Transport(
            "queue transport does not support explicit threads".into(),
        ))
    }

    async fn thread_exists(&self, key: &SessionKey) -> Result<bool> {
        Ok(self.reverse.lock().contains_key(key))
    }

    fn supports_scheduled_notifications(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::stores::InMemoryCorrelationStore;

    use super::*;

    fn transport(queue: Arc<InMemoryQueue>) -> QueueTransport {
        QueueTransport::new(
            queue,
            HashSet::from(["jack".to_string()]),
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            Arc::new(InMemoryCorrelationStore::new()),
        )
    }

    async fn read(t: &QueueTransport) -> Option<PromptEnvelope> {
        t.read_prompt(Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn valid_message_becomes_prompt() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push(r#"{"correlationId":"abc","agentId":"jack","prompt":"ping","sender":"ext"}"#);
        let transport = transport(queue.clone());

        let envelope = read(&transport).await.unwrap();
        assert_eq!(envelope.prompt, "ping");
        assert_eq!(envelope.sender_id, "ext");
        assert_eq!(envelope.source, Source::ServiceBus);
        assert!(envelope.conversation_id.is_some());
        assert!(queue.dead_lettered().is_empty());
    }

    #[tokio::test]
    async fn missing_field_dead_letters() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push(r#"{"correlationId":"abc","prompt":"ping","sender":"ext"}"#);
        let transport = transport(queue.clone());

        assert!(read(&transport).await.is_none());
        let dead = queue.dead_lettered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1, DeadLetterReason::MissingField);
    }

    #[tokio::test]
    async fn empty_field_counts_as_missing() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push(r#"{"correlationId":"abc","agentId":"jack","prompt":"","sender":"ext"}"#);
        let transport = transport(queue.clone());

        assert!(read(&transport).await.is_none());
        assert_eq!(queue.dead_lettered()[0].1, DeadLetterReason::MissingField);
    }

    #[tokio::test]
    async fn unknown_agent_dead_letters() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push(r#"{"correlationId":"abc","agentId":"nobody","prompt":"hi","sender":"ext"}"#);
        let transport = transport(queue.clone());

        assert!(read(&transport).await.is_none());
        assert_eq!(queue.dead_lettered()[0].1, DeadLetterReason::InvalidAgentId);
    }

    #[tokio::test]
    async fn malformed_json_dead_letters() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("{not json");
        let transport = transport(queue.clone());

        assert!(read(&transport).await.is_none());
        assert_eq!(
            queue.dead_lettered()[0].1,
            DeadLetterReason::DeserializationError
        );
    }

    #[tokio::test]
    async fn same_correlation_reuses_session() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push(r#"{"correlationId":"abc","agentId":"jack","prompt":"one","sender":"ext"}"#);
        queue.push(r#"{"correlationId":"abc","agentId":"jack","prompt":"two","sender":"ext"}"#);
        queue.push(r#"{"correlationId":"xyz","agentId":"jack","prompt":"three","sender":"ext"}"#);
        let transport = transport(queue);

        let first = read(&transport).await.unwrap();
        let second = read(&transport).await.unwrap();
        let third = read(&transport).await.unwrap();
        assert_eq!(first.conversation_id, second.conversation_id);
        assert_ne!(first.conversation_id, third.conversation_id);
    }

    #[tokio::test]
    async fn terminal_chunk_sends_outbound_envelope() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push(r#"{"correlationId":"abc","agentId":"jack","prompt":"ping","sender":"ext"}"#);
        let transport = transport(queue.clone());

        let envelope = read(&transport).await.unwrap();
        let key = SessionKey::new(
            envelope.conversation_id.unwrap(),
            envelope.thread_id.unwrap(),
            envelope.agent_id.clone().unwrap(),
        );

        let content = |delta: &str| StreamChunk {
            sequence: 0,
            message_id: None,
            payload: ChunkPayload::Content { delta: delta.into() },
            source: Source::ServiceBus,
        };
        transport.deliver(&key, content("po")).await.unwrap();
        transport.deliver(&key, content("ng")).await.unwrap();
        transport
            .deliver(
                &key,
                StreamChunk {
                    sequence: 2,
                    message_id: None,
                    payload: ChunkPayload::Terminal,
                    source: Source::ServiceBus,
                },
            )
            .await
            .unwrap();

        // The envelope is written from a spawned task.
        let sent = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let sent = queue.sent();
                if !sent.is_empty() {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sent.len(), 1);
        let out: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(out["correlationId"], "abc");
        assert_eq!(out["agentId"], "jack");
        assert_eq!(out["response"], "pong");
        // RFC 3339 UTC timestamp.
        let completed = out["completedAt"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(completed).is_ok());
        assert!(completed.ends_with('Z'));
    }

    #[tokio::test]
    async fn send_retries_then_gives_up() {
        struct FlakyQueue {
            failures: Mutex<u32>,
            sent: Mutex<Vec<String>>,
        }

        #[async_trait::async_trait]
        impl MessageQueue for FlakyQueue {
            async fn receive(&self, _timeout: Duration) -> Result<Option<String>> {
                Ok(None)
            }
            async fn send(&self, payload: String) -> Result<()> {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(Error::Transport("transient".into()));
                }
                self.sent.lock().push(payload);
                Ok(())
            }
            async fn dead_letter(&self, _p: String, _r: DeadLetterReason) -> Result<()> {
                Ok(())
            }
        }

        let flaky = Arc::new(FlakyQueue {
            failures: Mutex::new(2),
            sent: Mutex::new(Vec::new()),
        });
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        };

        send_with_retry(flaky.clone(), policy.clone(), "payload".into()).await;
        assert_eq!(flaky.sent.lock().len(), 1);

        // Exhaustion: more failures than attempts → nothing sent.
        *flaky.failures.lock() = 10;
        send_with_retry(flaky.clone(), policy, "payload2".into()).await;
        assert_eq!(flaky.sent.lock().len(), 1);
    }
}
