//! Turn execution loop — the inner orchestrator that streams model
//! responses, dispatches tool calls, and gates dangerous ones behind
//! human approval.
//!
//! Entry point: [`run_turn`] drives one full turn for a session and
//! emits every chunk through the stream buffer and the composite
//! router.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pal_domain::approval::{ApprovalCall, ApprovalOutcome, ApprovalRequest};
use pal_domain::chunk::{ChunkPayload, StreamChunk};
use pal_domain::error::{Error, Result};
use pal_domain::key::SessionKey;
use pal_domain::message::{ChatMessage, ToolCall};
use pal_domain::model::LanguageModel;
use pal_domain::prompt::Source;
use pal_sessions::SessionContext;

use crate::state::AppState;

use super::tools::dispatch_tool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn input / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
pub struct TurnInput {
    pub key: SessionKey,
    pub prompt: String,
    pub sender_id: String,
    pub source: Source,
}

/// How the turn loop ended.
enum TurnEnd {
    Completed,
    Cancelled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Emission path for one turn: the session assigns the sequence
/// number, the buffer records the chunk, the router fans it out.
struct ChunkSink {
    state: AppState,
    session: Arc<SessionContext>,
    key: SessionKey,
    source: Source,
}

impl ChunkSink {
    async fn emit(&self, payload: ChunkPayload, message_id: Option<String>) {
        let chunk = StreamChunk {
            sequence: self.session.next_sequence(),
            message_id,
            payload,
            source: self.source,
        };
        self.state.buffers.append(&self.key, chunk.clone());
        self.state.composite.route(&self.key, chunk).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — the outer wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn to completion.
///
/// The caller must already hold the session in `Running` phase and
/// have called `buffers.begin`. Errors that classify as transient
/// cancellation are swallowed (the turn is interrupted, not failed);
/// anything else becomes an error chunk.
pub async fn run_turn(
    state: AppState,
    session: Arc<SessionContext>,
    input: TurnInput,
    caller_ct: CancellationToken,
) -> Result<()> {
    let ct = session.linked_token(&caller_ct);
    let sink = ChunkSink {
        state: state.clone(),
        session: session.clone(),
        key: input.key.clone(),
        source: input.source,
    };

    session.log().append(ChatMessage::user_from(
        input.prompt.clone(),
        input.sender_id.clone(),
    ));

    let result = turn_loop(&state, &session, &input, &sink, &ct).await;

    let outcome = match result {
        Ok(TurnEnd::Completed) => {
            session.finish_turn();
            Ok(())
        }
        Ok(TurnEnd::Cancelled) => {
            session.mark_cancelled();
            Ok(())
        }
        Err(e) if e.is_transient_cancellation() => {
            // Silent: no chunk, the client treats the turn as
            // resumable.
            tracing::debug!(key = %input.key, "turn interrupted by transient cancellation");
            session.mark_cancelled();
            Ok(())
        }
        Err(e) => {
            tracing::error!(key = %input.key, error = %e, "turn failed");
            sink.emit(ChunkPayload::Error { message: e.to_string() }, None)
                .await;
            session.mark_faulted();
            Err(e)
        }
    };

    state.buffers.finish(&input.key);
    outcome
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// turn_loop — the depth-limited model/tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn turn_loop(
    state: &AppState,
    session: &Arc<SessionContext>,
    input: &TurnInput,
    sink: &ChunkSink,
    ct: &CancellationToken,
) -> Result<TurnEnd> {
    let max_depth = state.config.agent.max_depth;
    let tool_defs = state.tools.definitions();

    for depth in 0..max_depth {
        tracing::debug!(key = %input.key, depth, "model call");
        if ct.is_cancelled() {
            sink.emit(ChunkPayload::Terminal, None).await;
            return Ok(TurnEnd::Cancelled);
        }

        let stream = state
            .model
            .prompt(
                session.log().snapshot(),
                tool_defs.clone(),
                state.config.agent.temperature,
                ct.child_token(),
            )
            .await?;

        let assistant = match consume_model_stream(stream, sink, ct).await? {
            StreamOutcome::Cancelled => {
                sink.emit(ChunkPayload::Terminal, None).await;
                return Ok(TurnEnd::Cancelled);
            }
            StreamOutcome::Finished(assistant) => assistant,
        };

        let pending_calls = assistant.tool_calls.clone();
        session.log().append(assistant);

        // No tool calls: this is the final answer.
        if pending_calls.is_empty() {
            sink.emit(ChunkPayload::Terminal, None).await;
            return Ok(TurnEnd::Completed);
        }

        let results = match execute_tool_round(state, input, sink, ct, pending_calls).await? {
            ToolRoundOutcome::Cancelled { emit_terminal } => {
                if emit_terminal {
                    sink.emit(ChunkPayload::Terminal, None).await;
                }
                return Ok(TurnEnd::Cancelled);
            }
            ToolRoundOutcome::Results(results) => results,
        };

        // Tool results land in the log before the next model call.
        session.log().append_all(results);
    }

    Err(Error::AgentLoopLimit(max_depth))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model stream consumption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum StreamOutcome {
    Finished(ChatMessage),
    Cancelled,
}

/// Drain one model stream, emitting chunks as updates arrive and
/// assembling the logical assistant message.
///
/// A provider that changes `message_id` mid-stream starts a new
/// logical assistant turn: the accumulated message is appended to the
/// log and accumulation restarts.
async fn consume_model_stream(
    mut stream: pal_domain::model::BoxStream<'static, Result<pal_domain::model::ModelUpdate>>,
    sink: &ChunkSink,
    ct: &CancellationToken,
) -> Result<StreamOutcome> {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut pending_calls: Vec<ToolCall> = Vec::new();
    let mut message_id: Option<String> = None;

    while let Some(update) = stream.next().await {
        if ct.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }
        let update = update?;

        if let Some(id) = &update.message_id {
            if message_id.as_deref().is_some_and(|current| current != id) {
                // New logical assistant turn mid-stream.
                let finished = assemble_assistant(
                    std::mem::take(&mut content),
                    std::mem::take(&mut reasoning),
                    std::mem::take(&mut pending_calls),
                    message_id.take(),
                );
                sink.session.log().append(finished);
            }
            message_id = Some(id.clone());
        }

        if let Some(delta) = update.content {
            if !delta.is_empty() {
                sink.emit(
                    ChunkPayload::Content { delta: delta.clone() },
                    message_id.clone(),
                )
                .await;
                content.push_str(&delta);
            }
        }
        if let Some(delta) = update.reasoning {
            if !delta.is_empty() {
                sink.emit(
                    ChunkPayload::Reasoning { delta: delta.clone() },
                    message_id.clone(),
                )
                .await;
                reasoning.push_str(&delta);
            }
        }
        if let Some(calls) = update.tool_calls {
            let delta = serde_json::to_string(&calls).unwrap_or_default();
            sink.emit(ChunkPayload::ToolCall { delta }, message_id.clone())
                .await;
            pending_calls.extend(calls);
        }
        if update.terminal {
            break;
        }
    }

    Ok(StreamOutcome::Finished(assemble_assistant(
        content,
        reasoning,
        pending_calls,
        message_id,
    )))
}

fn assemble_assistant(
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    message_id: Option<String>,
) -> ChatMessage {
    let mut msg = ChatMessage::assistant_with_calls(content, tool_calls);
    if !reasoning.is_empty() {
        msg = msg.with_reasoning(reasoning);
    }
    if let Some(id) = message_id {
        msg = msg.with_message_id(id);
    }
    msg
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool round: gating + concurrent dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum ToolRoundOutcome {
    Results(Vec<ChatMessage>),
    Cancelled {
        /// Cancellation while waiting on approval terminates without a
        /// chunk; cancellation during execution still emits a terminal.
        emit_terminal: bool,
    },
}

/// Per-call decision after gating.
enum CallPlan {
    Execute(ToolCall),
    Rejected(ToolCall),
}

async fn execute_tool_round(
    state: &AppState,
    input: &TurnInput,
    sink: &ChunkSink,
    ct: &CancellationToken,
    calls: Vec<ToolCall>,
) -> Result<ToolRoundOutcome> {
    // ── Gate non-whitelisted calls ───────────────────────────────
    let gated: Vec<&ToolCall> = calls
        .iter()
        .filter(|call| !state.whitelist.allows(&input.key, call))
        .collect();

    let gated_outcome = if gated.is_empty() {
        ApprovalOutcome::AutoApproved
    } else {
        let request = ApprovalRequest {
            approval_id: Uuid::new_v4(),
            calls: gated
                .iter()
                .map(|call| ApprovalCall {
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .collect(),
        };
        let approval_id = request.approval_id;
        let rx = state.approvals.register(request.clone(), input.key.clone());
        sink.emit(ChunkPayload::Approval { request }, None).await;
        tracing::info!(key = %input.key, %approval_id, "turn suspended awaiting approval");

        tokio::select! {
            _ = ct.cancelled() => {
                // Implicit reject: discard and end without a chunk.
                state.approvals.discard(&approval_id);
                return Ok(ToolRoundOutcome::Cancelled { emit_terminal: false });
            }
            outcome = rx => match outcome {
                Ok(outcome) => outcome,
                // Sender dropped (gate discarded the request).
                Err(_) => return Ok(ToolRoundOutcome::Cancelled { emit_terminal: false }),
            },
        }
    };

    if gated_outcome == ApprovalOutcome::ApprovedAndRemember {
        for call in &gated {
            state.whitelist.remember(&input.key, call);
        }
    }

    let gated_signatures: Vec<String> = gated.iter().map(|c| c.signature()).collect();
    let plans: Vec<CallPlan> = calls
        .into_iter()
        .map(|call| {
            let is_gated = gated_signatures.contains(&call.signature());
            if is_gated && !gated_outcome.allows_execution() {
                CallPlan::Rejected(call)
            } else {
                CallPlan::Execute(call)
            }
        })
        .collect();

    // ── Dispatch concurrently, collect in original order ─────────
    let futures: Vec<_> = plans
        .iter()
        .map(|plan| {
            let ct = ct.child_token();
            async move {
                match plan {
                    CallPlan::Rejected(call) => ChatMessage::tool_result(
                        call.call_id.clone(),
                        serde_json::json!({ "status": "rejected" }).to_string(),
                    ),
                    CallPlan::Execute(call) => {
                        let outcome = dispatch_tool(&state.tools, call, ct).await;
                        ChatMessage::tool_result(call.call_id.clone(), outcome.into_content())
                    }
                }
            }
        })
        .collect();
    let results = futures_util::future::join_all(futures).await;

    if ct.is_cancelled() {
        return Ok(ToolRoundOutcome::Cancelled { emit_terminal: true });
    }
    Ok(ToolRoundOutcome::Results(results))
}
