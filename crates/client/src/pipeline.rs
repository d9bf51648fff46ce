//! Client message pipeline — correlation, assembly, resume, dedup.
//!
//! Sits between the transport subscription and the state slices. Each
//! inbound chunk is folded onto the topic's streaming accumulation; a
//! chunk that introduces a new message id *and carries content*
//! finalizes the previous assistant message, while tool-call-only
//! chunks never split a message. Outbound user messages get a
//! client-generated correlation id so echoed copies arriving via the
//! broadcast can be dropped.

use std::collections::HashSet;

use parking_lot::Mutex;
use uuid::Uuid;

use pal_domain::chunk::{ChunkPayload, StreamChunk, StreamState};
use pal_domain::message::ChatMessage;

use crate::resume;
use crate::slices::{
    ApprovalAction, MessagesAction, Slices, StreamingAction, StreamingContent,
};

pub struct ClientPipeline {
    slices: Slices,
    /// Message ids this client originated, for echo dedup.
    originated: Mutex<HashSet<String>>,
    /// Topics consuming a live stream right after a resume; their
    /// already-known deltas are skipped.
    dedupe_topics: Mutex<HashSet<String>>,
}

impl ClientPipeline {
    pub fn new(slices: Slices) -> Self {
        Self {
            slices,
            originated: Mutex::new(HashSet::new()),
            dedupe_topics: Mutex::new(HashSet::new()),
        }
    }

    pub fn slices(&self) -> &Slices {
        &self.slices
    }

    // ── Correlation ──────────────────────────────────────────────

    /// Record an outbound user message locally and return its
    /// correlation id.
    pub fn send_user_message(&self, topic: &str, text: &str, sender_id: &str) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        self.originated.lock().insert(correlation_id.clone());
        self.slices.messages.dispatch(&MessagesAction::AddMessage {
            topic: topic.into(),
            message: ChatMessage::user_from(text, sender_id).with_message_id(&correlation_id),
        });
        correlation_id
    }

    /// Fold an inbound user message from the broadcast, dropping
    /// echoes of messages this client originated.
    pub fn handle_inbound_user(&self, topic: &str, message: ChatMessage) {
        if let Some(id) = &message.message_id {
            if self.originated.lock().contains(id) {
                return;
            }
        }
        self.slices.messages.dispatch(&MessagesAction::AddMessage {
            topic: topic.into(),
            message,
        });
    }

    // ── Assembly ─────────────────────────────────────────────────

    /// Fold one inbound chunk onto the topic's streaming state.
    pub fn handle_chunk(&self, topic: &str, chunk: &StreamChunk) {
        match &chunk.payload {
            ChunkPayload::Content { delta } => {
                self.split_if_new_turn(topic, chunk.message_id.as_deref());
                if self.skip_duplicate(topic, delta, |c| &c.content) {
                    return;
                }
                self.slices.streaming.dispatch(&StreamingAction::StreamChunk {
                    topic: topic.into(),
                    content: Some(delta.clone()),
                    reasoning: None,
                    tool_call: None,
                    message_id: chunk.message_id.clone(),
                });
            }
            ChunkPayload::Reasoning { delta } => {
                if self.skip_duplicate(topic, delta, |c| &c.reasoning) {
                    return;
                }
                // Reasoning never splits the assistant message.
                self.slices.streaming.dispatch(&StreamingAction::StreamChunk {
                    topic: topic.into(),
                    content: None,
                    reasoning: Some(delta.clone()),
                    tool_call: None,
                    message_id: None,
                });
            }
            ChunkPayload::ToolCall { delta } => {
                if self.skip_duplicate(topic, delta, |c| &c.tool_calls) {
                    return;
                }
                // Tool-call updates never split the assistant message.
                self.slices.streaming.dispatch(&StreamingAction::StreamChunk {
                    topic: topic.into(),
                    content: None,
                    reasoning: None,
                    tool_call: Some(delta.clone()),
                    message_id: None,
                });
            }
            ChunkPayload::Terminal => {
                self.finalize(topic);
                self.slices
                    .streaming
                    .dispatch(&StreamingAction::StreamCompleted { topic: topic.into() });
                self.dedupe_topics.lock().remove(topic);
            }
            ChunkPayload::Error { message } => {
                self.slices.messages.dispatch(&MessagesAction::AddMessage {
                    topic: topic.into(),
                    message: ChatMessage::assistant(format!("error: {message}")),
                });
                self.slices
                    .streaming
                    .dispatch(&StreamingAction::StreamError { topic: topic.into() });
                self.dedupe_topics.lock().remove(topic);
            }
            ChunkPayload::Approval { request } => {
                self.slices.approval.dispatch(&ApprovalAction::ShowApproval {
                    topic: topic.into(),
                    request: request.clone(),
                });
            }
        }
    }

    /// A content-bearing chunk with a fresh message id finalizes the
    /// previous assistant message and starts a new accumulation.
    fn split_if_new_turn(&self, topic: &str, incoming_id: Option<&str>) {
        let Some(incoming_id) = incoming_id else {
            return;
        };
        let streaming = self.slices.streaming.state();
        let Some(current) = streaming.content_for(topic) else {
            return;
        };
        let changed = current
            .message_id
            .as_deref()
            .is_some_and(|current_id| current_id != incoming_id);
        if changed {
            self.finalize(topic);
            self.slices.streaming.dispatch(&StreamingAction::StreamStarted {
                topic: topic.into(),
                message_id: Some(incoming_id.into()),
            });
        }
    }

    /// Append the accumulated streaming content as a finished
    /// assistant message.
    fn finalize(&self, topic: &str) {
        let streaming = self.slices.streaming.state();
        let Some(content) = streaming.content_for(topic) else {
            return;
        };
        if content.is_empty() {
            return;
        }
        let mut message = ChatMessage::assistant(content.content.clone());
        if !content.reasoning.is_empty() {
            message = message.with_reasoning(content.reasoning.clone());
        }
        if let Some(id) = &content.message_id {
            message = message.with_message_id(id.clone());
        }
        self.slices.messages.dispatch(&MessagesAction::AddMessage {
            topic: topic.into(),
            message,
        });
    }

    /// Post-resume dedup: a delta whose text the client has already
    /// accumulated is skipped.
    fn skip_duplicate(
        &self,
        topic: &str,
        delta: &str,
        accumulated: impl Fn(&StreamingContent) -> &String,
    ) -> bool {
        if !self.dedupe_topics.lock().contains(topic) {
            return false;
        }
        let streaming = self.slices.streaming.state();
        let known = streaming.content_for(topic);
        known.is_some_and(|content| !delta.is_empty() && accumulated(content).contains(delta))
    }

    // ── Resume ───────────────────────────────────────────────────

    /// Reconcile the server's stream state with the local history,
    /// then arm post-resume dedup for the topic. Call before
    /// re-subscribing to live chunks.
    pub fn resume(&self, topic: &str, server: &StreamState) {
        self.slices
            .streaming
            .dispatch(&StreamingAction::StartResuming { topic: topic.into() });

        let history = self.slices.messages.state().messages_for(topic).to_vec();
        let reconciled = resume::reconcile(
            server,
            &history,
            server.current_prompt.as_deref(),
            server.current_sender_id.as_deref(),
        );

        self.slices.messages.dispatch(&MessagesAction::MessagesLoaded {
            topic: topic.into(),
            messages: reconciled.messages,
        });

        if server.is_processing || !reconciled.streaming.is_empty() {
            self.slices.streaming.dispatch(&StreamingAction::SetContent {
                topic: topic.into(),
                content: reconciled.streaming,
            });
            self.dedupe_topics.lock().insert(topic.into());
        } else {
            self.slices
                .streaming
                .dispatch(&StreamingAction::StopResuming { topic: topic.into() });
        }
    }
}

#[cfg(test)]
mod tests {
    use pal_domain::approval::{ApprovalCall, ApprovalRequest};
    use pal_domain::message::Role;
    use pal_domain::prompt::Source;

    use super::*;

    fn pipeline() -> ClientPipeline {
        ClientPipeline::new(Slices::new())
    }

    fn chunk(seq: u64, id: Option<&str>, payload: ChunkPayload) -> StreamChunk {
        StreamChunk {
            sequence: seq,
            message_id: id.map(Into::into),
            payload,
            source: Source::WebUi,
        }
    }

    fn content(delta: &str) -> ChunkPayload {
        ChunkPayload::Content { delta: delta.into() }
    }

    #[test]
    fn echoed_own_message_is_dropped() {
        let pipeline = pipeline();
        let correlation_id = pipeline.send_user_message("t1", "hello", "me");
        assert_eq!(pipeline.slices.messages.state().messages_for("t1").len(), 1);

        // The transport echoes our message back.
        let echo = ChatMessage::user_from("hello", "me").with_message_id(&correlation_id);
        pipeline.handle_inbound_user("t1", echo);
        assert_eq!(pipeline.slices.messages.state().messages_for("t1").len(), 1);

        // Someone else's message is kept.
        let other = ChatMessage::user_from("hi all", "them").with_message_id("other-id");
        pipeline.handle_inbound_user("t1", other);
        assert_eq!(pipeline.slices.messages.state().messages_for("t1").len(), 2);
    }

    #[test]
    fn chunks_accumulate_until_terminal() {
        let pipeline = pipeline();
        pipeline.handle_chunk("t1", &chunk(0, Some("m1"), content("Hi")));
        pipeline.handle_chunk("t1", &chunk(1, Some("m1"), content(" there")));

        let streaming = pipeline.slices.streaming.state();
        assert_eq!(streaming.content_for("t1").unwrap().content, "Hi there");

        pipeline.handle_chunk("t1", &chunk(2, Some("m1"), ChunkPayload::Terminal));
        let messages = pipeline.slices.messages.state();
        let list = messages.messages_for("t1");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].role, Role::Assistant);
        assert_eq!(list[0].content, "Hi there");
        assert_eq!(list[0].message_id.as_deref(), Some("m1"));
        assert!(pipeline.slices.streaming.state().content_for("t1").is_none());
    }

    #[test]
    fn new_message_id_with_content_splits_turn() {
        let pipeline = pipeline();
        pipeline.handle_chunk("t1", &chunk(0, Some("m1"), content("first")));
        pipeline.handle_chunk("t1", &chunk(1, Some("m2"), content("second")));

        // m1 was finalized into the messages slice.
        let messages = pipeline.slices.messages.state();
        assert_eq!(messages.messages_for("t1").len(), 1);
        assert_eq!(messages.messages_for("t1")[0].content, "first");

        // m2 is streaming.
        let streaming = pipeline.slices.streaming.state();
        let current = streaming.content_for("t1").unwrap();
        assert_eq!(current.content, "second");
        assert_eq!(current.message_id.as_deref(), Some("m2"));
    }

    #[test]
    fn tool_call_only_chunk_does_not_split() {
        let pipeline = pipeline();
        pipeline.handle_chunk("t1", &chunk(0, Some("m1"), content("text")));
        pipeline.handle_chunk(
            "t1",
            &chunk(1, Some("m2"), ChunkPayload::ToolCall { delta: "[]".into() }),
        );

        // Nothing finalized; accumulation continues on the same turn.
        assert!(pipeline.slices.messages.state().messages_for("t1").is_empty());
        let streaming = pipeline.slices.streaming.state();
        let current = streaming.content_for("t1").unwrap();
        assert_eq!(current.content, "text");
        assert_eq!(current.tool_calls, "[]");
        assert_eq!(current.message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn approval_chunk_raises_approval_state() {
        let pipeline = pipeline();
        let request = ApprovalRequest {
            approval_id: Uuid::new_v4(),
            calls: vec![ApprovalCall {
                tool_name: "deleteAll".into(),
                arguments: serde_json::json!({}),
            }],
        };
        pipeline.handle_chunk(
            "t1",
            &chunk(0, None, ChunkPayload::Approval { request: request.clone() }),
        );

        let approval = pipeline.slices.approval.state();
        assert_eq!(approval.topic_id.as_deref(), Some("t1"));
        assert_eq!(
            approval.current_request.as_ref().unwrap().approval_id,
            request.approval_id
        );
    }

    #[test]
    fn error_chunk_becomes_error_message() {
        let pipeline = pipeline();
        pipeline.handle_chunk(
            "t1",
            &chunk(0, None, ChunkPayload::Error { message: "model died".into() }),
        );
        let messages = pipeline.slices.messages.state();
        assert!(messages.messages_for("t1")[0].content.contains("model died"));
        assert!(!pipeline.slices.streaming.state().is_streaming("t1"));
    }

    #[test]
    fn resume_seeds_streaming_and_dedupes_live_replay() {
        let pipeline = pipeline();
        // History before disconnect.
        pipeline.slices.messages.dispatch(&MessagesAction::MessagesLoaded {
            topic: "t1".into(),
            messages: vec![ChatMessage::user("q")],
        });

        let server = StreamState {
            is_processing: true,
            current_prompt: Some("q".into()),
            current_sender_id: Some("alice".into()),
            current_message_id: Some("m1".into()),
            chunks: vec![chunk(0, Some("m1"), content("par")), chunk(1, Some("m1"), content("tial"))],
        };
        pipeline.resume("t1", &server);

        let streaming = pipeline.slices.streaming.state();
        assert_eq!(streaming.content_for("t1").unwrap().content, "partial");
        assert!(streaming.is_streaming("t1"));
        assert!(!streaming.is_resuming("t1"));

        // The live stream replays an already-known delta: skipped.
        pipeline.handle_chunk("t1", &chunk(2, Some("m1"), content("tial")));
        assert_eq!(
            pipeline.slices.streaming.state().content_for("t1").unwrap().content,
            "partial"
        );

        // Fresh content flows through.
        pipeline.handle_chunk("t1", &chunk(3, Some("m1"), content(" done")));
        assert_eq!(
            pipeline.slices.streaming.state().content_for("t1").unwrap().content,
            "partial done"
        );
    }

    #[test]
    fn resume_with_idle_server_just_merges() {
        let pipeline = pipeline();
        pipeline.slices.messages.dispatch(&MessagesAction::MessagesLoaded {
            topic: "t1".into(),
            messages: vec![ChatMessage::user("q")],
        });

        let server = StreamState::default();
        pipeline.resume("t1", &server);

        assert_eq!(pipeline.slices.messages.state().messages_for("t1").len(), 1);
        assert!(!pipeline.slices.streaming.state().is_streaming("t1"));
        assert!(!pipeline.slices.streaming.state().is_resuming("t1"));
    }
}
