//! One live session context per conversation key.
//!
//! A session owns the conversation log, a cooperative cancellation
//! scope, a monotonic chunk sequence counter, and the turn-phase state
//! machine `Idle → Running → (Idle | Cancelled | Faulted) → Disposed`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use pal_domain::key::SessionKey;

use crate::log::ConversationLog;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    Cancelled,
    Faulted,
    Disposed,
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("key", &self.key)
            .field("phase", &*self.phase.lock())
            .finish_non_exhaustive()
    }
}

pub struct SessionContext {
    key: SessionKey,
    cancel: CancellationToken,
    /// Scope of the turn currently running, a child of the session
    /// scope. Cancelling it ends the turn without poisoning the
    /// session for later turns.
    turn: Mutex<Option<CancellationToken>>,
    log: ConversationLog,
    sequence: AtomicU64,
    phase: Mutex<SessionPhase>,
    disposed: AtomicBool,
    /// Release callbacks registered by the session factory (LLM
    /// handles, tool-server subscriptions). Run exactly once, on
    /// disposal.
    releases: Mutex<Vec<ReleaseFn>>,
}

impl SessionContext {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            cancel: CancellationToken::new(),
            turn: Mutex::new(None),
            log: ConversationLog::new(),
            sequence: AtomicU64::new(0),
            phase: Mutex::new(SessionPhase::Idle),
            disposed: AtomicBool::new(false),
            releases: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// The session's cancellation scope. Callers that need a narrower
    /// lifetime (one turn, one tool call) take a child token so outer
    /// cancellation still propagates.
    pub fn cancel_scope(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A child token linked to the current turn scope (or the session
    /// scope when no turn is running) and to `caller`.
    pub fn linked_token(&self, caller: &CancellationToken) -> CancellationToken {
        let base = self
            .turn
            .lock()
            .clone()
            .unwrap_or_else(|| self.cancel.clone());
        let child = base.child_token();
        let linked = child.clone();
        let caller = caller.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = caller.cancelled() => linked.cancel(),
                // Turn end, session cancel, or dispose reaps this task.
                _ = linked.cancelled() => {}
            }
        });
        child
    }

    /// Next outgoing chunk sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    /// `Idle → Running`. Installs a fresh turn scope (a child of the
    /// session scope) and returns false when the session is not idle.
    pub fn begin_turn(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase != SessionPhase::Idle {
            return false;
        }
        *phase = SessionPhase::Running;
        *self.turn.lock() = Some(self.cancel.child_token());
        true
    }

    /// Cancel the turn currently in flight, if any.
    pub fn cancel_turn(&self) -> bool {
        match self.turn.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// `Running → Idle` on normal turn completion.
    pub fn finish_turn(&self) {
        let mut phase = self.phase.lock();
        if *phase == SessionPhase::Running {
            *phase = SessionPhase::Idle;
        }
        self.end_turn_scope();
    }

    /// `Running → Cancelled` when a cancel request ends the turn.
    pub fn mark_cancelled(&self) {
        let mut phase = self.phase.lock();
        if *phase == SessionPhase::Running {
            *phase = SessionPhase::Cancelled;
        }
        self.end_turn_scope();
    }

    /// `Running → Faulted` on an unhandled turn error.
    pub fn mark_faulted(&self) {
        let mut phase = self.phase.lock();
        if *phase == SessionPhase::Running {
            *phase = SessionPhase::Faulted;
        }
        self.end_turn_scope();
    }

    /// Drop (and cancel) the turn scope so linked tasks are reaped.
    fn end_turn_scope(&self) {
        if let Some(token) = self.turn.lock().take() {
            token.cancel();
        }
    }

    /// A cancelled or faulted session may accept a fresh turn.
    pub fn reset_to_idle(&self) {
        let mut phase = self.phase.lock();
        if matches!(*phase, SessionPhase::Cancelled | SessionPhase::Faulted) {
            *phase = SessionPhase::Idle;
        }
    }

    /// Register a resource release callback, run once on disposal.
    pub fn on_dispose(&self, release: impl FnOnce() + Send + 'static) {
        if self.disposed.load(Ordering::Acquire) {
            // Already disposed: release immediately rather than leak.
            release();
            return;
        }
        self.releases.lock().push(Box::new(release));
    }

    /// Cancel the scope (exactly once) and run all release callbacks.
    /// Idempotent; later calls are no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        *self.phase.lock() = SessionPhase::Disposed;
        let releases = std::mem::take(&mut *self.releases.lock());
        for release in releases {
            release();
        }
        tracing::debug!(key = %self.key, "session disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        // Guarantees release on every exit path, including panics that
        // unwind past the registry.
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    fn session() -> SessionContext {
        SessionContext::new(SessionKey::new(1, 1, "a"))
    }

    #[test]
    fn sequence_is_monotonic() {
        let s = session();
        let a = s.next_sequence();
        let b = s.next_sequence();
        let c = s.next_sequence();
        assert!(a < b && b < c);
    }

    #[test]
    fn phase_transitions() {
        let s = session();
        assert_eq!(s.phase(), SessionPhase::Idle);

        assert!(s.begin_turn());
        assert_eq!(s.phase(), SessionPhase::Running);
        assert!(!s.begin_turn()); // second turn rejected while running

        s.finish_turn();
        assert_eq!(s.phase(), SessionPhase::Idle);

        assert!(s.begin_turn());
        s.mark_cancelled();
        assert_eq!(s.phase(), SessionPhase::Cancelled);

        s.reset_to_idle();
        assert!(s.begin_turn());
        s.mark_faulted();
        assert_eq!(s.phase(), SessionPhase::Faulted);
    }

    #[test]
    fn dispose_cancels_scope_once_and_runs_releases() {
        let s = session();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        s.on_dispose(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!s.cancel_scope().is_cancelled());
        s.dispose();
        assert!(s.cancel_scope().is_cancelled());
        assert_eq!(s.phase(), SessionPhase::Disposed);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Second dispose is a no-op.
        s.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_registered_after_dispose_runs_immediately() {
        let s = session();
        s.dispose();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        s.on_dispose(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_disposes() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let s = session();
            let c = count.clone();
            s.on_dispose(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_turn_does_not_poison_later_turns() {
        let s = session();
        assert!(!s.cancel_turn()); // nothing running yet

        assert!(s.begin_turn());
        let first = s.linked_token(&CancellationToken::new());
        assert!(s.cancel_turn());
        first.cancelled().await;
        s.mark_cancelled();

        // A fresh turn gets a fresh, uncancelled scope.
        s.reset_to_idle();
        assert!(s.begin_turn());
        let second = s.linked_token(&CancellationToken::new());
        assert!(!second.is_cancelled());

        // Disposal still reaches the new turn scope.
        s.dispose();
        second.cancelled().await;
    }

    #[tokio::test]
    async fn linked_token_observes_both_scopes() {
        let s = session();
        let caller = CancellationToken::new();
        let linked = s.linked_token(&caller);
        assert!(!linked.is_cancelled());

        caller.cancel();
        linked.cancelled().await;
        assert!(linked.is_cancelled());
        // The session scope itself is untouched by caller cancellation.
        assert!(!s.cancel_scope().is_cancelled());

        let linked2 = s.linked_token(&CancellationToken::new());
        s.cancel_scope().cancel();
        linked2.cancelled().await;
    }
}
