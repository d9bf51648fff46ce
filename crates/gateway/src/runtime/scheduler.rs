//! Scheduler wake cycle.
//!
//! Every 30 seconds the scheduler pops due entries from the schedule
//! store and injects their prompts into the intake stream, provided at
//! least one transport accepts scheduled notifications. One-shot
//! schedules are deleted after firing; repeating ones are re-armed.

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use pal_domain::persist::ScheduleStore;
use pal_domain::prompt::{PromptEnvelope, Source};

use crate::state::AppState;

const TICK_SECS: u64 = 30;
const SCHEDULER_SENDER: &str = "scheduler";

pub async fn run_scheduler(state: AppState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_SECS));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => tick(&state).await,
        }
    }
    tracing::info!("scheduler stopped");
}

/// One wake cycle: fire everything due as of now.
pub async fn tick(state: &AppState) {
    let due = match state.schedule_store.get_due(Utc::now()).await {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!(error = %e, "schedule store read failed");
            return;
        }
    };
    if due.is_empty() {
        return;
    }

    if state.composite.scheduled_targets().is_empty() {
        tracing::warn!(
            due = due.len(),
            "schedules due but no transport accepts scheduled notifications"
        );
        return;
    }

    for schedule in due {
        tracing::info!(id = %schedule.id, key = %schedule.key, "firing schedule");

        // Route through the originating transport when known; the web
        // UI observer picks it up otherwise.
        let source = state
            .composite
            .source_of(schedule.key.conversation_id)
            .unwrap_or(Source::WebUi);
        let mut envelope = PromptEnvelope::new(&schedule.prompt, SCHEDULER_SENDER, source);
        envelope.conversation_id = Some(schedule.key.conversation_id);
        envelope.thread_id = Some(schedule.key.thread_id);
        envelope.agent_id = Some(schedule.key.agent_id.clone());
        state.composite.inject(envelope);

        let result = match schedule.repeat_secs {
            Some(secs) => {
                let mut next = schedule.clone();
                next.due_at = Utc::now() + ChronoDuration::seconds(secs as i64);
                state.schedule_store.update(next).await
            }
            None => state.schedule_store.delete(&schedule.id).await,
        };
        if let Err(e) = result {
            tracing::warn!(id = %schedule.id, error = %e, "schedule re-arm failed");
        }
    }
}
