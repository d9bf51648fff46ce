//! Runtime orchestration: prompt intake, session resolution, and turn
//! spawning.
//!
//! The intake loop reads merged prompts from the composite transport,
//! resolves (or creates) the session for each, and spawns the turn on
//! its own task so independent sessions run in parallel.

pub mod approval;
pub mod buffer;
pub mod scheduler;
pub mod tools;
pub mod turn;
pub mod whitelist;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use pal_domain::error::Result;
use pal_domain::key::SessionKey;
use pal_domain::prompt::PromptEnvelope;
use pal_sessions::SessionContext;

use crate::state::AppState;
use crate::transport::ChatTransport;

pub use turn::{run_turn, TurnInput};

/// Drive prompt intake until `shutdown` fires, then close the
/// registry so in-flight sessions cancel cooperatively.
pub async fn run_intake(state: AppState, shutdown: CancellationToken) {
    let read_timeout = Duration::from_secs(state.config.buffer.intake_timeout_secs);
    let mut prompts = state.composite.spawn_intake(read_timeout, shutdown.clone());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = prompts.recv() => match next {
                Some(envelope) => handle_prompt(&state, envelope).await,
                None => break,
            },
        }
    }

    state.registry.close();
    tracing::info!("prompt intake stopped");
}

/// Route one prompt envelope into a session turn.
pub async fn handle_prompt(state: &AppState, envelope: PromptEnvelope) {
    let key = match resolve_key(state, &envelope).await {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, source = %envelope.source, "dropping unroutable prompt");
            return;
        }
    };
    state.composite.record_source(key.conversation_id, envelope.source);

    let session = {
        let factory_key = key.clone();
        let state_for_factory = state.clone();
        match state
            .registry
            .resolve(&key, move || async move {
                let session = SessionContext::new(factory_key.clone());
                // Disposal releases everything the session pinned.
                let buffers = state_for_factory.buffers.clone();
                let whitelist = state_for_factory.whitelist.clone();
                let release_key = factory_key.clone();
                session.on_dispose(move || {
                    buffers.clear(&release_key);
                    whitelist.forget_session(&release_key);
                });
                Ok(session)
            })
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "session resolve failed");
                return;
            }
        }
    };

    // A cancelled or faulted session accepts a fresh turn.
    session.reset_to_idle();
    if !session.begin_turn() {
        tracing::warn!(key = %key, "turn already in progress; prompt dropped");
        return;
    }

    state
        .buffers
        .begin(&key, &envelope.prompt, &envelope.sender_id);

    let input = TurnInput {
        key: key.clone(),
        prompt: envelope.prompt,
        sender_id: envelope.sender_id,
        source: envelope.source,
    };
    let turn_state = state.clone();
    let turn_span = tracing::info_span!("turn", key = %key, source = %input.source);
    tokio::spawn(
        async move {
            if let Err(e) = run_turn(turn_state, session, input, CancellationToken::new()).await {
                tracing::error!(error = %e, "turn ended with error");
            }
        }
        .instrument(turn_span),
    );
}

/// Fill in missing ids via the originating transport's topic
/// allocation.
async fn resolve_key(state: &AppState, envelope: &PromptEnvelope) -> Result<SessionKey> {
    if let (Some(conversation), Some(thread), Some(agent)) = (
        envelope.conversation_id,
        envelope.thread_id,
        envelope.agent_id.as_deref(),
    ) {
        return Ok(SessionKey::new(conversation, thread, agent));
    }

    let transport = state
        .composite
        .child(envelope.source)
        .ok_or_else(|| pal_domain::Error::Transport(format!(
            "no transport registered for {}",
            envelope.source
        )))?;
    transport
        .create_topic_if_needed(
            envelope.conversation_id,
            envelope.thread_id,
            envelope.agent_id.as_deref(),
            None,
        )
        .await
}

/// Cancel the in-flight turn for a session, if any. The session
/// itself stays usable for later prompts.
pub fn cancel_session(state: &AppState, key: &SessionKey) -> bool {
    match state.registry.get(key) {
        Some(session) => session.cancel_turn(),
        None => false,
    }
}

/// Spawn the periodic background tasks: the scheduler wake cycle and
/// the correlation sweep. Returns immediately; tasks stop on
/// `shutdown`.
pub fn spawn_background_tasks(state: &AppState, shutdown: &CancellationToken) {
    {
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            scheduler::run_scheduler(state, shutdown).await;
        });
    }

    // Hourly sweep of expired correlation entries.
    {
        let correlations = state.correlation_store.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3_600));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match correlations.sweep_expired().await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(removed = n, "swept expired correlations"),
                            Err(e) => tracing::warn!(error = %e, "correlation sweep failed"),
                        }
                    }
                }
            }
        });
    }
}

/// Convenience wrapper used by the API layer and tests: push a prompt
/// through the full pipeline as if the web UI sent it.
pub async fn submit_web_prompt(
    state: &AppState,
    prompt: &str,
    sender_id: &str,
    conversation_id: Option<i64>,
    thread_id: Option<i64>,
    agent_id: Option<&str>,
) -> Result<SessionKey> {
    let key = state
        .web_ui
        .create_topic_if_needed(conversation_id, thread_id, agent_id, None)
        .await?;

    let mut envelope = PromptEnvelope::new(prompt, sender_id, state.web_ui.source());
    envelope.conversation_id = Some(key.conversation_id);
    envelope.thread_id = Some(key.thread_id);
    envelope.agent_id = Some(key.agent_id.clone());
    state.web_ui.submit(envelope).await?;
    Ok(key)
}

/// Shared bootstrap used by `serve` and the CLI chat mode.
pub fn start(state: &AppState, shutdown: &CancellationToken) {
    {
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_intake(state, shutdown).await;
        });
    }
    spawn_background_tasks(state, shutdown);
}
