//! Transport contract and routing policy.
//!
//! A transport is anything that can feed prompts into the runtime and
//! receive response chunks back: the web UI bridge, the message queue,
//! a chat bot, the CLI. Wire encodings live outside the runtime; the
//! contract speaks [`PromptEnvelope`] and [`StreamChunk`] only.

pub mod composite;
pub mod local;
pub mod queue;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pal_domain::chunk::StreamChunk;
use pal_domain::error::Result;
use pal_domain::key::SessionKey;
use pal_domain::prompt::{PromptEnvelope, Source};

pub use composite::CompositeTransport;
pub use local::LocalTransport;
pub use queue::{InMemoryQueue, MessageQueue, QueueTransport, RetryPolicy};

#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    fn source(&self) -> Source;

    /// Pull the next prompt. `Ok(None)` on timeout so the intake loop
    /// can check for shutdown between reads.
    async fn read_prompt(
        &self,
        timeout: Duration,
        ct: &CancellationToken,
    ) -> Result<Option<PromptEnvelope>>;

    /// Deliver one response chunk for a session bound to this
    /// transport.
    async fn deliver(&self, key: &SessionKey, chunk: StreamChunk) -> Result<()>;

    /// Resolve or allocate the conversation key for a topic.
    async fn create_topic_if_needed(
        &self,
        conversation_id: Option<i64>,
        thread_id: Option<i64>,
        agent_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<SessionKey>;

    /// Allocate a new thread within an existing conversation.
    async fn create_thread(
        &self,
        conversation_id: i64,
        name: &str,
        agent_id: Option<&str>,
    ) -> Result<i64>;

    async fn thread_exists(&self, key: &SessionKey) -> Result<bool>;

    /// Whether the scheduler may push scheduled notifications here.
    fn supports_scheduled_notifications(&self) -> bool;
}

/// The routing policy: which transports receive chunks for a prompt
/// originating from `source`. The web UI observes everything; every
/// other transport only sees its own conversations.
pub fn route_targets(source: Source) -> Vec<Source> {
    match source {
        Source::WebUi => vec![Source::WebUi],
        other => vec![Source::WebUi, other],
    }
}
