//! Streaming slice: in-flight assistant content per topic.
//!
//! `streaming_topics` and `resuming_topics` are disjoint in steady
//! state: starting a stream removes the topic from the resuming set
//! and vice versa.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{map_with, set_with, set_without, unchanged};

/// Accumulated partial assistant output for one topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingContent {
    pub message_id: Option<String>,
    pub content: String,
    pub reasoning: String,
    pub tool_calls: String,
}

impl StreamingContent {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty() && self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingState {
    pub streaming_by_topic: HashMap<String, StreamingContent>,
    pub streaming_topics: HashSet<String>,
    pub resuming_topics: HashSet<String>,
}

impl StreamingState {
    pub fn content_for(&self, topic: &str) -> Option<&StreamingContent> {
        self.streaming_by_topic.get(topic)
    }

    pub fn is_streaming(&self, topic: &str) -> bool {
        self.streaming_topics.contains(topic)
    }

    pub fn is_resuming(&self, topic: &str) -> bool {
        self.resuming_topics.contains(topic)
    }
}

#[derive(Debug, Clone)]
pub enum StreamingAction {
    /// A new stream begins; any prior accumulation for the topic is
    /// replaced.
    StreamStarted {
        topic: String,
        message_id: Option<String>,
    },
    /// Incremental deltas for the topic's stream.
    StreamChunk {
        topic: String,
        content: Option<String>,
        reasoning: Option<String>,
        tool_call: Option<String>,
        message_id: Option<String>,
    },
    StreamCompleted { topic: String },
    StreamCancelled { topic: String },
    StreamError { topic: String },
    StartResuming { topic: String },
    StopResuming { topic: String },
    /// Seed accumulated content (resume reconciliation outcome).
    SetContent {
        topic: String,
        content: StreamingContent,
    },
}

pub fn reduce(state: &Arc<StreamingState>, action: &StreamingAction) -> Arc<StreamingState> {
    match action {
        StreamingAction::StreamStarted { topic, message_id } => Arc::new(StreamingState {
            streaming_by_topic: map_with(
                &state.streaming_by_topic,
                topic.clone(),
                StreamingContent {
                    message_id: message_id.clone(),
                    ..Default::default()
                },
            ),
            streaming_topics: set_with(&state.streaming_topics, topic.clone()),
            resuming_topics: set_without(&state.resuming_topics, topic),
        }),

        StreamingAction::StreamChunk {
            topic,
            content,
            reasoning,
            tool_call,
            message_id,
        } => {
            let mut accumulated = state.content_for(topic).cloned().unwrap_or_default();
            if let Some(id) = message_id {
                accumulated.message_id = Some(id.clone());
            }
            if let Some(delta) = content {
                accumulated.content.push_str(delta);
            }
            if let Some(delta) = reasoning {
                accumulated.reasoning.push_str(delta);
            }
            if let Some(delta) = tool_call {
                accumulated.tool_calls.push_str(delta);
            }
            Arc::new(StreamingState {
                streaming_by_topic: map_with(&state.streaming_by_topic, topic.clone(), accumulated),
                streaming_topics: set_with(&state.streaming_topics, topic.clone()),
                resuming_topics: state.resuming_topics.clone(),
            })
        }

        StreamingAction::StreamCompleted { topic }
        | StreamingAction::StreamCancelled { topic }
        | StreamingAction::StreamError { topic } => {
            if !state.is_streaming(topic) && state.content_for(topic).is_none() {
                return unchanged(state);
            }
            let mut streaming_by_topic = state.streaming_by_topic.clone();
            streaming_by_topic.remove(topic);
            Arc::new(StreamingState {
                streaming_by_topic,
                streaming_topics: set_without(&state.streaming_topics, topic),
                resuming_topics: state.resuming_topics.clone(),
            })
        }

        StreamingAction::StartResuming { topic } => Arc::new(StreamingState {
            streaming_by_topic: state.streaming_by_topic.clone(),
            streaming_topics: set_without(&state.streaming_topics, topic),
            resuming_topics: set_with(&state.resuming_topics, topic.clone()),
        }),

        StreamingAction::StopResuming { topic } => {
            if !state.is_resuming(topic) {
                return unchanged(state);
            }
            Arc::new(StreamingState {
                streaming_by_topic: state.streaming_by_topic.clone(),
                streaming_topics: state.streaming_topics.clone(),
                resuming_topics: set_without(&state.resuming_topics, topic),
            })
        }

        // Resume hand-off: the topic leaves the resuming set and
        // streams from the seeded accumulation.
        StreamingAction::SetContent { topic, content } => Arc::new(StreamingState {
            streaming_by_topic: map_with(&state.streaming_by_topic, topic.clone(), content.clone()),
            streaming_topics: set_with(&state.streaming_topics, topic.clone()),
            resuming_topics: set_without(&state.resuming_topics, topic),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(state: Arc<StreamingState>, action: StreamingAction) -> Arc<StreamingState> {
        reduce(&state, &action)
    }

    fn chunk(topic: &str, content: &str) -> StreamingAction {
        StreamingAction::StreamChunk {
            topic: topic.into(),
            content: Some(content.into()),
            reasoning: None,
            tool_call: None,
            message_id: None,
        }
    }

    #[test]
    fn chunks_accumulate() {
        let mut state = Arc::new(StreamingState::default());
        state = apply(
            state,
            StreamingAction::StreamStarted {
                topic: "t1".into(),
                message_id: Some("m1".into()),
            },
        );
        state = apply(state, chunk("t1", "Hi"));
        state = apply(state, chunk("t1", " there"));

        let content = state.content_for("t1").unwrap();
        assert_eq!(content.content, "Hi there");
        assert_eq!(content.message_id.as_deref(), Some("m1"));
        assert!(state.is_streaming("t1"));
    }

    #[test]
    fn completed_drops_accumulation() {
        let mut state = Arc::new(StreamingState::default());
        state = apply(state, chunk("t1", "partial"));
        state = apply(state, StreamingAction::StreamCompleted { topic: "t1".into() });
        assert!(state.content_for("t1").is_none());
        assert!(!state.is_streaming("t1"));
    }

    #[test]
    fn streaming_and_resuming_are_disjoint() {
        let mut state = Arc::new(StreamingState::default());
        state = apply(state, StreamingAction::StartResuming { topic: "t1".into() });
        assert!(state.is_resuming("t1"));
        assert!(!state.is_streaming("t1"));

        state = apply(
            state,
            StreamingAction::StreamStarted {
                topic: "t1".into(),
                message_id: None,
            },
        );
        assert!(state.is_streaming("t1"));
        assert!(!state.is_resuming("t1"));
    }

    #[test]
    fn stop_resuming_without_resume_is_identity() {
        let state = Arc::new(StreamingState::default());
        let next = reduce(&state, &StreamingAction::StopResuming { topic: "t1".into() });
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn completing_idle_topic_is_identity() {
        let state = Arc::new(StreamingState::default());
        let next = reduce(&state, &StreamingAction::StreamCompleted { topic: "t1".into() });
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn reasoning_and_tool_calls_accumulate_separately() {
        let mut state = Arc::new(StreamingState::default());
        state = apply(
            state,
            StreamingAction::StreamChunk {
                topic: "t1".into(),
                content: None,
                reasoning: Some("thinking".into()),
                tool_call: None,
                message_id: None,
            },
        );
        state = apply(
            state,
            StreamingAction::StreamChunk {
                topic: "t1".into(),
                content: None,
                reasoning: None,
                tool_call: Some("{\"tool\":\"x\"}".into()),
                message_id: None,
            },
        );
        let content = state.content_for("t1").unwrap();
        assert_eq!(content.reasoning, "thinking");
        assert_eq!(content.tool_calls, "{\"tool\":\"x\"}");
        assert!(content.content.is_empty());
    }
}
