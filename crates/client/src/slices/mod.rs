//! Per-feature state slices: each owns its state shape, action enum,
//! and pure reducer. No slice references another slice's state.

pub mod approval;
pub mod connection;
pub mod messages;
pub mod streaming;
pub mod topics;

use std::sync::Arc;

use crate::store::Store;

pub use approval::{ApprovalAction, ApprovalState};
pub use connection::{ConnectionAction, ConnectionState, ConnectionStatus};
pub use messages::{MessagesAction, MessagesState};
pub use streaming::{StreamingAction, StreamingContent, StreamingState};
pub use topics::{AgentInfo, Topic, TopicsAction, TopicsState};

/// All five slices, constructed together at client startup and
/// disposed together at teardown.
#[derive(Clone)]
pub struct Slices {
    pub topics: Store<TopicsState, TopicsAction>,
    pub messages: Store<MessagesState, MessagesAction>,
    pub streaming: Store<StreamingState, StreamingAction>,
    pub connection: Store<ConnectionState, ConnectionAction>,
    pub approval: Store<ApprovalState, ApprovalAction>,
}

impl Slices {
    pub fn new() -> Self {
        Self {
            topics: Store::new(TopicsState::default(), |s, a| topics::reduce(s, a)),
            messages: Store::new(MessagesState::default(), |s, a| messages::reduce(s, a)),
            streaming: Store::new(StreamingState::default(), |s, a| streaming::reduce(s, a)),
            connection: Store::new(ConnectionState::default(), |s, a| connection::reduce(s, a)),
            approval: Store::new(ApprovalState::default(), |s, a| approval::reduce(s, a)),
        }
    }

    pub fn dispose(&self) {
        self.topics.dispose();
        self.messages.dispose();
        self.streaming.dispose();
        self.connection.dispose();
        self.approval.dispose();
    }
}

impl Default for Slices {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reducer helper: rebuild a map with one key overridden.
pub(crate) fn map_with<K: std::hash::Hash + Eq + Clone, V: Clone>(
    map: &std::collections::HashMap<K, V>,
    key: K,
    value: V,
) -> std::collections::HashMap<K, V> {
    let mut next = map.clone();
    next.insert(key, value);
    next
}

/// Shared reducer helper: rebuild a set with one element added.
pub(crate) fn set_with<K: std::hash::Hash + Eq + Clone>(
    set: &std::collections::HashSet<K>,
    key: K,
) -> std::collections::HashSet<K> {
    let mut next = set.clone();
    next.insert(key);
    next
}

/// Shared reducer helper: rebuild a set with one element removed.
pub(crate) fn set_without<K: std::hash::Hash + Eq + Clone>(
    set: &std::collections::HashSet<K>,
    key: &K,
) -> std::collections::HashSet<K> {
    let mut next = set.clone();
    next.remove(key);
    next
}

/// Unchanged-state shorthand: hand the same `Arc` back so the store
/// skips notification.
pub(crate) fn unchanged<T>(state: &Arc<T>) -> Arc<T> {
    state.clone()
}
