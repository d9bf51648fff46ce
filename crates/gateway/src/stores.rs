//! In-memory reference implementations of the persistence contracts.
//!
//! Durable drivers are pluggable; these cover the development server
//! and tests, and document the expected semantics (notably the 30-day
//! correlation TTL).

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use pal_domain::error::Result;
use pal_domain::key::SessionKey;
use pal_domain::persist::{
    CorrelationStore, Schedule, ScheduleStore, ThreadState, ThreadStateStore,
    CORRELATION_TTL_DAYS,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryThreadStateStore {
    entries: RwLock<HashMap<SessionKey, ThreadState>>,
}

impl InMemoryThreadStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ThreadStateStore for InMemoryThreadStateStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<ThreadState>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &SessionKey, state: ThreadState) -> Result<()> {
        self.entries.write().insert(key.clone(), state);
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryScheduleStore {
    entries: RwLock<HashMap<Uuid, Schedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn create(&self, schedule: Schedule) -> Result<()> {
        self.entries.write().insert(schedule.id, schedule);
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Schedule>> {
        Ok(self.entries.read().get(id).cloned())
    }

    async fn update(&self, schedule: Schedule) -> Result<()> {
        self.entries.write().insert(schedule.id, schedule);
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Schedule>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    async fn get_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let mut due: Vec<Schedule> = self
            .entries
            .read()
            .values()
            .filter(|s| s.due_at <= as_of)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.due_at);
        Ok(due)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Correlations (30-day TTL)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InMemoryCorrelationStore {
    entries: RwLock<HashMap<SessionKey, (String, DateTime<Utc>)>>,
}

impl Default for InMemoryCorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn expired(stored_at: DateTime<Utc>) -> bool {
        Utc::now() - stored_at > ChronoDuration::days(CORRELATION_TTL_DAYS)
    }

    /// Remove every expired entry. Called by the periodic sweep.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, stored_at)| !Self::expired(*stored_at));
        before - entries.len()
    }
}

#[async_trait::async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn put(&self, key: &SessionKey, correlation_id: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.clone(), (correlation_id.to_owned(), Utc::now()));
        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<String>> {
        // Lazy expiry on access.
        let hit = self.entries.read().get(key).cloned();
        match hit {
            Some((_, stored_at)) if Self::expired(stored_at) => {
                self.entries.write().remove(key);
                Ok(None)
            }
            Some((correlation_id, _)) => Ok(Some(correlation_id)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &SessionKey) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize> {
        Ok(self.sweep())
    }
}
