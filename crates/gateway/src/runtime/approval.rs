//! Approval gate — suspends a turn until a human resolves the request.
//!
//! When the agent loop hits a non-whitelisted tool batch it parks on a
//! `oneshot` receiver stored here and emits an approval chunk; the
//! HTTP endpoint (or a transport) resolves it out of band. Resolution
//! is first-writer-wins: the losing caller gets `false`, which the API
//! surfaces as 404.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use pal_domain::approval::{ApprovalOutcome, ApprovalRequest};
use pal_domain::key::SessionKey;

/// A pending approval waiting for a decision.
struct PendingApproval {
    request: ApprovalRequest,
    key: SessionKey,
    created_at: DateTime<Utc>,
    respond: oneshot::Sender<ApprovalOutcome>,
}

/// Serializable snapshot of a pending approval (for introspection).
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalInfo {
    pub approval_id: Uuid,
    pub key: SessionKey,
    pub request: ApprovalRequest,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<Uuid, PendingApproval>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval. Returns the receiver the turn
    /// parks on.
    pub fn register(
        &self,
        request: ApprovalRequest,
        key: SessionKey,
    ) -> oneshot::Receiver<ApprovalOutcome> {
        let (tx, rx) = oneshot::channel();
        let id = request.approval_id;
        self.pending.lock().insert(
            id,
            PendingApproval {
                request,
                key,
                created_at: Utc::now(),
                respond: tx,
            },
        );
        rx
    }

    /// Resolve a pending approval. Returns `false` when the id is
    /// unknown or already resolved.
    pub fn resolve(&self, id: &Uuid, outcome: ApprovalOutcome) -> bool {
        match self.pending.lock().remove(id) {
            Some(pending) => {
                // The turn may have been cancelled and dropped its
                // receiver; that is still a successful resolution from
                // the caller's point of view.
                let _ = pending.respond.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Discard a request whose turn was cancelled while waiting.
    pub fn discard(&self, id: &Uuid) {
        self.pending.lock().remove(id);
    }

    /// Pending approvals, for dashboard introspection.
    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending
            .lock()
            .values()
            .map(|p| ApprovalInfo {
                approval_id: p.request.approval_id,
                key: p.key.clone(),
                request: p.request.clone(),
                created_at: p.created_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pal_domain::approval::ApprovalCall;

    use super::*;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            approval_id: Uuid::new_v4(),
            calls: vec![ApprovalCall {
                tool_name: "deleteAll".into(),
                arguments: serde_json::json!({}),
            }],
        }
    }

    fn key() -> SessionKey {
        SessionKey::new(1, 1, "a")
    }

    #[tokio::test]
    async fn resolve_unblocks_waiter() {
        let gate = ApprovalGate::new();
        let req = request();
        let id = req.approval_id;
        let rx = gate.register(req, key());

        assert!(gate.resolve(&id, ApprovalOutcome::Approved));
        assert_eq!(rx.await.unwrap(), ApprovalOutcome::Approved);
        assert!(gate.list_pending().is_empty());
    }

    #[test]
    fn second_resolution_loses() {
        let gate = ApprovalGate::new();
        let req = request();
        let id = req.approval_id;
        let _rx = gate.register(req, key());

        assert!(gate.resolve(&id, ApprovalOutcome::Rejected));
        assert!(!gate.resolve(&id, ApprovalOutcome::Approved));
    }

    #[test]
    fn unknown_id_is_rejected() {
        let gate = ApprovalGate::new();
        assert!(!gate.resolve(&Uuid::new_v4(), ApprovalOutcome::Approved));
    }

    #[test]
    fn discard_removes_pending() {
        let gate = ApprovalGate::new();
        let req = request();
        let id = req.approval_id;
        let _rx = gate.register(req, key());

        gate.discard(&id);
        assert!(gate.list_pending().is_empty());
        assert!(!gate.resolve(&id, ApprovalOutcome::Approved));
    }

    #[test]
    fn list_pending_snapshots() {
        let gate = ApprovalGate::new();
        let req = request();
        let id = req.approval_id;
        let _rx = gate.register(req, key());

        let pending = gate.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].approval_id, id);
        assert_eq!(pending[0].request.calls[0].tool_name, "deleteAll");
    }
}
