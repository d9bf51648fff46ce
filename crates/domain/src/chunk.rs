//! Stream chunks — the unit of partial response delivery.
//!
//! A chunk carries exactly one kind of payload, so the payload is a
//! sum type rather than a struct of mostly-empty optionals. Sequence
//! numbers are monotonic per session and assigned at emit time by the
//! stream buffer.

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalRequest;
use crate::prompt::Source;

/// The single populated field of a stream chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChunkPayload {
    /// Incremental assistant text.
    #[serde(rename = "content")]
    Content { delta: String },

    /// Incremental reasoning text.
    #[serde(rename = "reasoning")]
    Reasoning { delta: String },

    /// Incremental tool-call argument text.
    #[serde(rename = "tool_call")]
    ToolCall { delta: String },

    /// The final chunk of a turn.
    #[serde(rename = "terminal")]
    Terminal,

    /// A fatal turn error.
    #[serde(rename = "error")]
    Error { message: String },

    /// The turn is suspended pending human approval.
    #[serde(rename = "approval")]
    Approval { request: ApprovalRequest },
}

impl ChunkPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkPayload::Terminal | ChunkPayload::Error { .. })
    }

    /// Content text, when this is a content chunk.
    pub fn content(&self) -> Option<&str> {
        match self {
            ChunkPayload::Content { delta } => Some(delta),
            _ => None,
        }
    }
}

/// One streamed partial response unit emitted by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamChunk {
    /// Monotonic per session, assigned at emit.
    pub sequence: u64,
    /// Groups chunks belonging to one logical assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub payload: ChunkPayload,
    /// Origin of the prompt this chunk answers; drives routing.
    pub source: Source,
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}

/// Snapshot of a thread's server-side stream state, returned to
/// resuming clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamState {
    pub is_processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_message_id: Option<String>,
    #[serde(default)]
    pub chunks: Vec<StreamChunk>,
}
