//! Approval slice: the approval request currently shown to the user.
//!
//! `current_request` and `topic_id` are always both set or both
//! cleared.

use std::sync::Arc;

use pal_domain::approval::ApprovalRequest;

use super::unchanged;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApprovalState {
    pub current_request: Option<ApprovalRequest>,
    pub topic_id: Option<String>,
    pub is_responding: bool,
}

#[derive(Debug, Clone)]
pub enum ApprovalAction {
    ShowApproval {
        topic: String,
        request: ApprovalRequest,
    },
    ApprovalResponding,
    ApprovalResolved,
    ClearApproval,
}

pub fn reduce(state: &Arc<ApprovalState>, action: &ApprovalAction) -> Arc<ApprovalState> {
    match action {
        ApprovalAction::ShowApproval { topic, request } => Arc::new(ApprovalState {
            current_request: Some(request.clone()),
            topic_id: Some(topic.clone()),
            is_responding: false,
        }),

        ApprovalAction::ApprovalResponding => {
            if state.current_request.is_none() {
                return unchanged(state);
            }
            Arc::new(ApprovalState {
                is_responding: true,
                ..(**state).clone()
            })
        }

        ApprovalAction::ApprovalResolved | ApprovalAction::ClearApproval => {
            if state.current_request.is_none() && state.topic_id.is_none() {
                return unchanged(state);
            }
            Arc::new(ApprovalState::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use pal_domain::approval::ApprovalCall;
    use uuid::Uuid;

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

    #[test]
    fn show_sets_request_and_topic_together() {
        let state = reduce(
            &Arc::new(ApprovalState::default()),
            &ApprovalAction::ShowApproval {
                topic: "t1".into(),
                request: request(),
            },
        );
        assert!(state.current_request.is_some());
        assert_eq!(state.topic_id.as_deref(), Some("t1"));
        assert!(!state.is_responding);
    }

    #[test]
    fn resolved_clears_both() {
        let mut state = reduce(
            &Arc::new(ApprovalState::default()),
            &ApprovalAction::ShowApproval {
                topic: "t1".into(),
                request: request(),
            },
        );
        state = reduce(&state, &ApprovalAction::ApprovalResponding);
        assert!(state.is_responding);

        state = reduce(&state, &ApprovalAction::ApprovalResolved);
        assert!(state.current_request.is_none());
        assert!(state.topic_id.is_none());
        assert!(!state.is_responding);
    }

    #[test]
    fn responding_without_request_is_identity() {
        let state = Arc::new(ApprovalState::default());
        let next = reduce(&state, &ApprovalAction::ApprovalResponding);
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn clear_on_empty_state_is_identity() {
        let state = Arc::new(ApprovalState::default());
        let next = reduce(&state, &ApprovalAction::ClearApproval);
        assert!(Arc::ptr_eq(&state, &next));
    }
}
