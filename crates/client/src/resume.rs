//! Resume reconciliation.
//!
//! When a client reconnects to a thread with an in-flight (or just
//! finished) turn, the server hands it the buffered stream state.
//! [`reconcile`] merges that buffer with the client's existing
//! history: completed turns already known act as anchors, new turns
//! are inserted at anchor boundaries, and the streaming tail is
//! stripped of content the client has already rendered.

use pal_domain::chunk::{ChunkPayload, StreamState};
use pal_domain::message::{ChatMessage, Role, ToolCall};

use crate::slices::StreamingContent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rebuild: chunks → turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
struct TurnGroup {
    message_id: Option<String>,
    content: String,
    reasoning: String,
    tool_calls: String,
    terminated: bool,
}

impl TurnGroup {
    fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty() && self.tool_calls.is_empty()
    }

    fn into_message(self) -> ChatMessage {
        let tool_calls: Vec<ToolCall> =
            serde_json::from_str(&self.tool_calls).unwrap_or_default();
        let mut msg = ChatMessage::assistant_with_calls(self.content, tool_calls);
        if !self.reasoning.is_empty() {
            msg = msg.with_reasoning(self.reasoning);
        }
        if let Some(id) = self.message_id {
            msg = msg.with_message_id(id);
        }
        msg
    }
}

/// The buffer, regrouped into completed assistant turns plus the
/// in-progress tail.
#[derive(Debug, Clone, Default)]
pub struct RebuiltStream {
    pub completed_turns: Vec<ChatMessage>,
    pub streaming: StreamingContent,
}

/// Walk the buffered chunks in sequence order and group them into
/// logical turns. Chunks with no id belong to the current tail;
/// terminal and error chunks terminate a group without contributing
/// content.
pub fn rebuild(state: &StreamState) -> RebuiltStream {
    let mut chunks: Vec<_> = state.chunks.iter().collect();
    chunks.sort_by_key(|c| c.sequence);

    let mut groups: Vec<TurnGroup> = Vec::new();
    for chunk in chunks {
        let start_new = match groups.last() {
            None => true,
            Some(current) => {
                current.terminated
                    || matches!(
                        (&current.message_id, &chunk.message_id),
                        (Some(current_id), Some(chunk_id)) if current_id != chunk_id
                    )
            }
        };
        if start_new {
            groups.push(TurnGroup::default());
        }
        let current = groups.last_mut().expect("group exists");

        if current.message_id.is_none() {
            current.message_id = chunk.message_id.clone();
        }
        match &chunk.payload {
            ChunkPayload::Content { delta } => current.content.push_str(delta),
            ChunkPayload::Reasoning { delta } => current.reasoning.push_str(delta),
            ChunkPayload::ToolCall { delta } => current.tool_calls.push_str(delta),
            ChunkPayload::Terminal | ChunkPayload::Error { .. } => current.terminated = true,
            // Approval chunks carry no turn content.
            ChunkPayload::Approval { .. } => {}
        }
    }

    // The tail group is the streaming message only while it has not
    // terminated; empty terminated groups (a bare terminal chunk) are
    // dropped.
    let mut streaming = StreamingContent::default();
    if let Some(last) = groups.last() {
        if !last.terminated {
            let tail = groups.pop().expect("tail exists");
            streaming = StreamingContent {
                message_id: tail.message_id.clone(),
                content: tail.content,
                reasoning: tail.reasoning,
                tool_calls: tail.tool_calls,
            };
        }
    }

    let completed_turns = groups
        .into_iter()
        .filter(|g| !g.is_empty())
        .map(TurnGroup::into_message)
        .collect();

    RebuiltStream {
        completed_turns,
        streaming,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconcile: buffer + client history → merged view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    /// Client history with new completed turns inserted at anchor
    /// boundaries. Relative order of the original history is
    /// preserved.
    pub messages: Vec<ChatMessage>,
    /// The in-progress tail, stripped of content the client already
    /// has.
    pub streaming: StreamingContent,
}

pub fn reconcile(
    state: &StreamState,
    history: &[ChatMessage],
    current_prompt: Option<&str>,
    sender_id: Option<&str>,
) -> Reconciled {
    let rebuilt = rebuild(state);

    // ── Classify completed turns against the history ─────────────
    let is_anchor = |turn: &ChatMessage| {
        turn.message_id.as_ref().is_some_and(|id| {
            history
                .iter()
                .any(|m| m.role == Role::Assistant && m.message_id.as_ref() == Some(id))
        })
    };

    let mut leading_new: Vec<ChatMessage> = Vec::new();
    // anchor message id → turns following it (until the next anchor).
    let mut following: Vec<(String, Vec<ChatMessage>)> = Vec::new();
    let mut enrich: Vec<ChatMessage> = Vec::new();

    for turn in rebuilt.completed_turns {
        if is_anchor(&turn) {
            let id = turn.message_id.clone().expect("anchors have ids");
            following.push((id, Vec::new()));
            enrich.push(turn);
        } else {
            match following.last_mut() {
                Some((_, bucket)) => bucket.push(turn),
                None => leading_new.push(turn),
            }
        }
    }

    // ── Merge ────────────────────────────────────────────────────
    let first_anchor_id = following.first().map(|(id, _)| id.clone());
    let mut merged: Vec<ChatMessage> = Vec::new();
    let duplicate_of_history = |candidate: &ChatMessage| {
        history.iter().any(|m| match (&candidate.message_id, &m.message_id) {
            (Some(a), Some(b)) => a == b,
            _ => m.role == candidate.role && m.content == candidate.content,
        })
    };

    for message in history {
        let anchor_id = message.message_id.clone().filter(|id| {
            message.role == Role::Assistant && following.iter().any(|(aid, _)| aid == id)
        });

        if let Some(id) = &anchor_id {
            if first_anchor_id.as_ref() == Some(id) {
                for turn in leading_new.drain(..) {
                    if !duplicate_of_history(&turn) {
                        merged.push(turn);
                    }
                }
            }
            // Enrich the anchor when the client's copy is missing
            // reasoning or tool calls the buffer has.
            let buffered = enrich
                .iter()
                .find(|t| t.message_id.as_ref() == Some(id))
                .cloned();
            let mut anchor = message.clone();
            if let Some(buffered) = buffered {
                // The buffer holds the completed turn; a client copy
                // cut off mid-stream is extended to the full content.
                if buffered.content.len() > anchor.content.len()
                    && buffered.content.starts_with(&anchor.content)
                {
                    anchor.content = buffered.content;
                }
                if anchor.reasoning.is_none() && buffered.reasoning.is_some() {
                    anchor.reasoning = buffered.reasoning;
                }
                if anchor.tool_calls.is_empty() && !buffered.tool_calls.is_empty() {
                    anchor.tool_calls = buffered.tool_calls;
                }
            }
            merged.push(anchor);

            if let Some((_, bucket)) = following.iter_mut().find(|(aid, _)| aid == id) {
                for turn in bucket.drain(..) {
                    if !duplicate_of_history(&turn) {
                        merged.push(turn);
                    }
                }
            }
        } else {
            // Non-anchor history messages are untouched.
            merged.push(message.clone());
        }
    }

    // No anchors at all: everything new happened after the history.
    for turn in leading_new {
        if !duplicate_of_history(&turn) {
            merged.push(turn);
        }
    }

    // ── Strip duplicate streaming content ────────────────────────
    let mut streaming = rebuilt.streaming;
    if !streaming.content.is_empty() {
        let known_assistant_contents: Vec<&str> = merged
            .iter()
            .filter(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect();

        if known_assistant_contents
            .iter()
            .any(|known| known.contains(&streaming.content))
        {
            // Already fully rendered; keep reasoning/tool-calls only.
            streaming.content.clear();
        } else if let Some(prefix) = known_assistant_contents
            .iter()
            .find(|known| streaming.content.starts_with(**known))
        {
            streaming.content = streaming.content[prefix.len()..].to_string();
        }
    }

    // ── Append the current prompt when the client lacks it ───────
    if let Some(prompt) = current_prompt {
        let already_present = merged
            .iter()
            .any(|m| m.role == Role::User && m.content == prompt);
        if !already_present {
            let user = match sender_id {
                Some(sender) => ChatMessage::user_from(prompt, sender),
                None => ChatMessage::user(prompt),
            };
            merged.push(user);
        }
    }

    Reconciled {
        messages: merged,
        streaming,
    }
}
