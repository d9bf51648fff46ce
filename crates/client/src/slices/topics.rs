//! Topics slice: the topic list, agent list, and current selections.
//! Selection holds only the id; the full topic is derived via a
//! selector.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::unchanged;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicsState {
    pub topics: Vec<Topic>,
    pub selected_topic_id: Option<String>,
    pub agents: Vec<AgentInfo>,
    pub selected_agent_id: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl TopicsState {
    /// The full selected topic, derived from the id.
    pub fn selected_topic(&self) -> Option<&Topic> {
        let id = self.selected_topic_id.as_deref()?;
        self.topics.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone)]
pub enum TopicsAction {
    LoadTopics,
    TopicsLoaded(Vec<Topic>),
    SelectTopic(String),
    AddTopic(Topic),
    UpdateTopic(Topic),
    RemoveTopic(String),
    SetAgents(Vec<AgentInfo>),
    SelectAgent(String),
    TopicsError(String),
}

pub fn reduce(state: &Arc<TopicsState>, action: &TopicsAction) -> Arc<TopicsState> {
    match action {
        TopicsAction::LoadTopics => Arc::new(TopicsState {
            is_loading: true,
            ..(**state).clone()
        }),
        TopicsAction::TopicsLoaded(topics) => Arc::new(TopicsState {
            topics: topics.clone(),
            is_loading: false,
            // Success clears a stale error.
            error: None,
            ..(**state).clone()
        }),
        TopicsAction::SelectTopic(id) => {
            if state.selected_topic_id.as_deref() == Some(id) {
                return unchanged(state);
            }
            Arc::new(TopicsState {
                selected_topic_id: Some(id.clone()),
                ..(**state).clone()
            })
        }
        TopicsAction::AddTopic(topic) => {
            let mut topics = state.topics.clone();
            topics.push(topic.clone());
            Arc::new(TopicsState {
                topics,
                ..(**state).clone()
            })
        }
        TopicsAction::UpdateTopic(updated) => {
            let Some(position) = state.topics.iter().position(|t| t.id == updated.id) else {
                return unchanged(state);
            };
            let mut topics = state.topics.clone();
            topics[position] = updated.clone();
            Arc::new(TopicsState {
                topics,
                ..(**state).clone()
            })
        }
        TopicsAction::RemoveTopic(id) => {
            if !state.topics.iter().any(|t| &t.id == id) {
                return unchanged(state);
            }
            let topics = state
                .topics
                .iter()
                .filter(|t| &t.id != id)
                .cloned()
                .collect();
            // Removing the selected topic clears the selection.
            let selected_topic_id = match state.selected_topic_id.as_deref() {
                Some(selected) if selected == id => None,
                other => other.map(Into::into),
            };
            Arc::new(TopicsState {
                topics,
                selected_topic_id,
                ..(**state).clone()
            })
        }
        TopicsAction::SetAgents(agents) => Arc::new(TopicsState {
            agents: agents.clone(),
            ..(**state).clone()
        }),
        TopicsAction::SelectAgent(id) => {
            if state.selected_agent_id.as_deref() == Some(id) {
                return unchanged(state);
            }
            Arc::new(TopicsState {
                selected_agent_id: Some(id.clone()),
                ..(**state).clone()
            })
        }
        TopicsAction::TopicsError(error) => Arc::new(TopicsState {
            error: Some(error.clone()),
            is_loading: false,
            ..(**state).clone()
        }),
    }
}
