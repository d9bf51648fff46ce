//! Messages slice: per-topic ordered message lists.
//!
//! `loaded_topics` distinguishes "topic has no messages" from "topic
//! was never fetched".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pal_domain::message::ChatMessage;

use super::{map_with, set_with, unchanged};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagesState {
    pub messages_by_topic: HashMap<String, Vec<ChatMessage>>,
    pub loaded_topics: HashSet<String>,
}

impl MessagesState {
    pub fn messages_for(&self, topic: &str) -> &[ChatMessage] {
        self.messages_by_topic
            .get(topic)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_loaded(&self, topic: &str) -> bool {
        self.loaded_topics.contains(topic)
    }
}

#[derive(Debug, Clone)]
pub enum MessagesAction {
    LoadMessages {
        topic: String,
    },
    MessagesLoaded {
        topic: String,
        messages: Vec<ChatMessage>,
    },
    AddMessage {
        topic: String,
        message: ChatMessage,
    },
    UpdateMessage {
        topic: String,
        index: usize,
        message: ChatMessage,
    },
    RemoveMessage {
        topic: String,
        index: usize,
    },
    ClearMessages {
        topic: String,
    },
}

pub fn reduce(state: &Arc<MessagesState>, action: &MessagesAction) -> Arc<MessagesState> {
    match action {
        // The fetch itself is a side effect; the reducer only records
        // nothing until MessagesLoaded arrives.
        MessagesAction::LoadMessages { .. } => unchanged(state),

        MessagesAction::MessagesLoaded { topic, messages } => Arc::new(MessagesState {
            messages_by_topic: map_with(&state.messages_by_topic, topic.clone(), messages.clone()),
            loaded_topics: set_with(&state.loaded_topics, topic.clone()),
        }),

        MessagesAction::AddMessage { topic, message } => {
            let mut list = state.messages_for(topic).to_vec();
            list.push(message.clone());
            Arc::new(MessagesState {
                messages_by_topic: map_with(&state.messages_by_topic, topic.clone(), list),
                loaded_topics: state.loaded_topics.clone(),
            })
        }

        MessagesAction::UpdateMessage {
            topic,
            index,
            message,
        } => {
            let current = state.messages_for(topic);
            if *index >= current.len() {
                return unchanged(state);
            }
            let mut list = current.to_vec();
            list[*index] = message.clone();
            Arc::new(MessagesState {
                messages_by_topic: map_with(&state.messages_by_topic, topic.clone(), list),
                loaded_topics: state.loaded_topics.clone(),
            })
        }

        MessagesAction::RemoveMessage { topic, index } => {
            let current = state.messages_for(topic);
            if *index >= current.len() {
                return unchanged(state);
            }
            let mut list = current.to_vec();
            list.remove(*index);
            Arc::new(MessagesState {
                messages_by_topic: map_with(&state.messages_by_topic, topic.clone(), list),
                loaded_topics: state.loaded_topics.clone(),
            })
        }

        MessagesAction::ClearMessages { topic } => {
            if !state.messages_by_topic.contains_key(topic) {
                return unchanged(state);
            }
            let mut messages_by_topic = state.messages_by_topic.clone();
            messages_by_topic.remove(topic);
            Arc::new(MessagesState {
                messages_by_topic,
                loaded_topics: state.loaded_topics.clone(),
            })
        }
    }
}
