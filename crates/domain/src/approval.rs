use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One `(tool, arguments)` pair awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalCall {
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// A request to approve a batch of tool calls, emitted as a stream
/// chunk while the owning turn is suspended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub approval_id: Uuid,
    pub calls: Vec<ApprovalCall>,
}

/// How a pending approval was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalOutcome {
    Rejected,
    Approved,
    /// Approve and install a whitelist entry for this tool+arguments
    /// signature so future identical calls run without asking.
    ApprovedAndRemember,
    /// Internal equivalent of `Approved` used when policy pre-authorizes.
    AutoApproved,
}

impl ApprovalOutcome {
    pub fn allows_execution(self) -> bool {
        !matches!(self, ApprovalOutcome::Rejected)
    }
}
