//! Composite transport — fan-in of prompts, policy fan-out of chunks.
//!
//! Child transports are registered by source. The intake task merges
//! their prompt reads into one channel; `route` copies each chunk to
//! the transports the routing policy selects. The conversation→source
//! map is recorded when a prompt first enters the system; a chunk for
//! a conversation with no recorded source only reaches the web UI
//! observer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pal_domain::chunk::StreamChunk;
use pal_domain::key::SessionKey;
use pal_domain::prompt::{PromptEnvelope, Source};

use super::{route_targets, ChatTransport};

pub struct CompositeTransport {
    children: RwLock<HashMap<Source, Arc<dyn ChatTransport>>>,
    /// conversation id → originating source, pinned at intake.
    sources: RwLock<HashMap<i64, Source>>,
    /// Side door for the scheduler's synthesized prompts.
    inject_tx: mpsc::UnboundedSender<PromptEnvelope>,
    inject_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<PromptEnvelope>>>,
}

impl Default for CompositeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeTransport {
    pub fn new() -> Self {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        Self {
            children: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
            inject_tx,
            inject_rx: parking_lot::Mutex::new(Some(inject_rx)),
        }
    }

    pub fn register(&self, transport: Arc<dyn ChatTransport>) {
        self.children.write().insert(transport.source(), transport);
    }

    pub fn child(&self, source: Source) -> Option<Arc<dyn ChatTransport>> {
        self.children.read().get(&source).cloned()
    }

    /// Pin the originating source for a conversation.
    pub fn record_source(&self, conversation_id: i64, source: Source) {
        self.sources.write().insert(conversation_id, source);
    }

    pub fn source_of(&self, conversation_id: i64) -> Option<Source> {
        self.sources.read().get(&conversation_id).copied()
    }

    /// Children that accept scheduled notifications.
    pub fn scheduled_targets(&self) -> Vec<Arc<dyn ChatTransport>> {
        self.children
            .read()
            .values()
            .filter(|t| t.supports_scheduled_notifications())
            .cloned()
            .collect()
    }

    /// Enqueue a runtime-synthesized prompt (scheduler wake cycle).
    pub fn inject(&self, envelope: PromptEnvelope) {
        let _ = self.inject_tx.send(envelope);
    }

    /// Start the merged prompt intake. One reader task per child plus
    /// the injection channel; all feed the returned receiver. Each
    /// read honors `read_timeout` so tasks observe `ct` promptly.
    pub fn spawn_intake(
        self: &Arc<Self>,
        read_timeout: Duration,
        ct: CancellationToken,
    ) -> mpsc::Receiver<PromptEnvelope> {
        let (tx, rx) = mpsc::channel(256);

        for child in self.children.read().values().cloned() {
            let tx = tx.clone();
            let ct = ct.clone();
            let composite = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    if ct.is_cancelled() {
                        break;
                    }
                    match child.read_prompt(read_timeout, &ct).await {
                        Ok(Some(envelope)) => {
                            if let Some(conversation_id) = envelope.conversation_id {
                                composite.record_source(conversation_id, envelope.source);
                            }
                            if tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(source = %child.source(), error = %e, "prompt read failed");
                        }
                    }
                }
            });
        }

        // Injected prompts (scheduler) merge into the same stream.
        if let Some(mut inject_rx) = self.inject_rx.lock().take() {
            let tx = tx.clone();
            let ct = ct.clone();
            let composite = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = ct.cancelled() => break,
                        next = inject_rx.recv() => match next {
                            Some(envelope) => {
                                if let Some(conversation_id) = envelope.conversation_id {
                                    composite.record_source(conversation_id, envelope.source);
                                }
                                if tx.send(envelope).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        rx
    }

    /// Fan one chunk out according to the routing policy.
    pub async fn route(&self, key: &SessionKey, chunk: StreamChunk) {
        let targets = match self.source_of(key.conversation_id) {
            Some(source) => route_targets(source),
            // Unknown conversation: observer only.
            None => vec![Source::WebUi],
        };

        for target in targets {
            let Some(child) = self.child(target) else {
                continue;
            };
            if let Err(e) = child.deliver(key, chunk.clone()).await {
                // One slow or broken transport must not stall the rest.
                tracing::warn!(target = %target, key = %key, error = %e, "chunk delivery failed");
            }
        }
    }

    /// Drive a whole response stream through the router.
    pub async fn write_chunks(
        &self,
        stream: impl futures_core::Stream<Item = (SessionKey, StreamChunk)>,
    ) {
        futures_util::pin_mut!(stream);
        while let Some((key, chunk)) = stream.next().await {
            self.route(&key, chunk).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use pal_domain::chunk::ChunkPayload;

    use crate::transport::LocalTransport;

    use super::*;

    fn chunk(source: Source) -> StreamChunk {
        StreamChunk {
            sequence: 0,
            message_id: None,
            payload: ChunkPayload::Content { delta: "x".into() },
            source,
        }
    }

    fn setup() -> (
        Arc<CompositeTransport>,
        Arc<LocalTransport>,
        Arc<LocalTransport>,
        Arc<LocalTransport>,
    ) {
        let composite = Arc::new(CompositeTransport::new());
        let web = Arc::new(LocalTransport::new(Source::WebUi, "jack", true));
        let tg = Arc::new(LocalTransport::new(Source::Telegram, "jack", true));
        let cli = Arc::new(LocalTransport::new(Source::Cli, "jack", false));
        composite.register(web.clone());
        composite.register(tg.clone());
        composite.register(cli.clone());
        (composite, web, tg, cli)
    }

    #[tokio::test]
    async fn routes_to_observer_and_origin() {
        let (composite, web, tg, cli) = setup();
        let mut web_rx = web.subscribe();
        let mut tg_rx = tg.subscribe();
        let mut cli_rx = cli.subscribe();

        let key = SessionKey::new(5, 5, "jack");
        composite.record_source(5, Source::Telegram);
        composite.route(&key, chunk(Source::Telegram)).await;

        assert!(web_rx.try_recv().is_ok());
        assert!(tg_rx.try_recv().is_ok());
        assert!(cli_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn web_ui_prompts_route_to_web_ui_only() {
        let (composite, web, tg, _cli) = setup();
        let mut web_rx = web.subscribe();
        let mut tg_rx = tg.subscribe();

        let key = SessionKey::new(9, 9, "jack");
        composite.record_source(9, Source::WebUi);
        composite.route(&key, chunk(Source::WebUi)).await;

        assert!(web_rx.try_recv().is_ok());
        assert!(tg_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_source_goes_to_observer_only() {
        let (composite, web, tg, cli) = setup();
        let mut web_rx = web.subscribe();
        let mut tg_rx = tg.subscribe();
        let mut cli_rx = cli.subscribe();

        let key = SessionKey::new(404, 404, "jack");
        composite.route(&key, chunk(Source::Telegram)).await;

        assert!(web_rx.try_recv().is_ok());
        assert!(tg_rx.try_recv().is_err());
        assert!(cli_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn intake_merges_children_and_records_sources() {
        let (composite, web, tg, _cli) = setup();
        let ct = CancellationToken::new();
        let mut rx = composite.spawn_intake(Duration::from_millis(20), ct.clone());

        let mut web_prompt = PromptEnvelope::new("from web", "alice", Source::WebUi);
        web_prompt.conversation_id = Some(1);
        web_prompt.thread_id = Some(1);
        web.submit(web_prompt).await.unwrap();

        let mut tg_prompt = PromptEnvelope::new("from telegram", "bob", Source::Telegram);
        tg_prompt.conversation_id = Some(2);
        tg_prompt.thread_id = Some(2);
        tg.submit(tg_prompt).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(rx.recv().await.unwrap().prompt);
        }
        seen.sort();
        assert_eq!(seen, vec!["from telegram", "from web"]);
        assert_eq!(composite.source_of(1), Some(Source::WebUi));
        assert_eq!(composite.source_of(2), Some(Source::Telegram));
        ct.cancel();
    }

    #[tokio::test]
    async fn injected_prompts_flow_through_intake() {
        let (composite, _web, _tg, _cli) = setup();
        let ct = CancellationToken::new();
        let mut rx = composite.spawn_intake(Duration::from_millis(20), ct.clone());

        let mut scheduled = PromptEnvelope::new("wake up", "scheduler", Source::WebUi);
        scheduled.conversation_id = Some(3);
        scheduled.thread_id = Some(3);
        composite.inject(scheduled);

        assert_eq!(rx.recv().await.unwrap().prompt, "wake up");
        assert_eq!(composite.source_of(3), Some(Source::WebUi));
        ct.cancel();
    }

    #[tokio::test]
    async fn scheduled_targets_filters_children() {
        let (composite, _web, _tg, _cli) = setup();
        let targets = composite.scheduled_targets();
        let sources: Vec<Source> = targets.iter().map(|t| t.source()).collect();
        assert!(sources.contains(&Source::WebUi));
        assert!(sources.contains(&Source::Telegram));
        assert!(!sources.contains(&Source::Cli));
    }
}
