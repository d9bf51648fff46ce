//! Shared application state passed to the runtime and API handlers.

use std::sync::Arc;

use pal_domain::config::Config;
use pal_domain::model::LanguageModel;
use pal_domain::persist::{CorrelationStore, ScheduleStore, ThreadStateStore};
use pal_sessions::SessionRegistry;

use crate::runtime::approval::ApprovalGate;
use crate::runtime::buffer::StreamBuffers;
use crate::runtime::tools::ToolSet;
use crate::runtime::whitelist::Whitelist;
use crate::stores::{InMemoryCorrelationStore, InMemoryScheduleStore, InMemoryThreadStateStore};
use crate::transport::{
    CompositeTransport, InMemoryQueue, LocalTransport, QueueTransport, RetryPolicy,
};

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core services** — config, model, tools
/// - **Sessions & streaming** — registry, buffers
/// - **Gating** — approval gate, whitelist
/// - **Transports** — composite router plus the web UI handle the
///   HTTP layer pushes prompts through
/// - **Persistence** — pluggable store contracts
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub model: Arc<dyn LanguageModel>,
    pub tools: Arc<ToolSet>,

    // ── Sessions & streaming ──────────────────────────────────────────
    pub registry: Arc<SessionRegistry>,
    pub buffers: Arc<StreamBuffers>,

    // ── Gating ────────────────────────────────────────────────────────
    pub approvals: Arc<ApprovalGate>,
    pub whitelist: Arc<Whitelist>,

    // ── Transports ────────────────────────────────────────────────────
    pub composite: Arc<CompositeTransport>,
    /// The web UI transport; the HTTP layer submits prompts here and
    /// dashboard consumers subscribe to its chunk broadcast.
    pub web_ui: Arc<LocalTransport>,

    // ── Persistence ───────────────────────────────────────────────────
    pub thread_store: Arc<dyn ThreadStateStore>,
    pub schedule_store: Arc<dyn ScheduleStore>,
    pub correlation_store: Arc<dyn CorrelationStore>,
}

/// Wire up an [`AppState`] with in-memory stores, the web UI
/// transport, and a queue transport over an in-memory broker.
///
/// Embedders that need a real broker or durable stores construct the
/// state by hand; this covers the server binary and tests.
pub fn build_app_state(
    config: Arc<Config>,
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolSet>,
) -> pal_domain::Result<(AppState, Arc<InMemoryQueue>)> {
    let whitelist = Arc::new(Whitelist::new(&config.agent.whitelist_patterns)?);
    let buffers = Arc::new(StreamBuffers::new(std::time::Duration::from_secs(
        config.buffer.grace_secs,
    )));

    let correlation_store: Arc<dyn CorrelationStore> = Arc::new(InMemoryCorrelationStore::new());
    let composite = Arc::new(CompositeTransport::new());

    let web_ui = Arc::new(LocalTransport::new(
        pal_domain::prompt::Source::WebUi,
        "default",
        true,
    ));
    composite.register(web_ui.clone());

    let queue = Arc::new(InMemoryQueue::new());
    let bus = Arc::new(QueueTransport::new(
        queue.clone(),
        config.queue.known_agents.clone(),
        RetryPolicy {
            attempts: config.queue.retry_attempts,
            base_delay: std::time::Duration::from_secs(config.queue.retry_base_secs),
        },
        correlation_store.clone(),
    ));
    composite.register(bus);

    let state = AppState {
        config,
        model,
        tools,
        registry: Arc::new(SessionRegistry::new()),
        buffers,
        approvals: Arc::new(ApprovalGate::new()),
        whitelist,
        composite,
        web_ui,
        thread_store: Arc::new(InMemoryThreadStateStore::new()),
        schedule_store: Arc::new(InMemoryScheduleStore::new()),
        correlation_store,
    };
    Ok((state, queue))
}
