//! Pluggable persistence contracts.
//!
//! The runtime only ever talks to these traits; concrete drivers
//! (files, databases) are supplied by the embedding application. The
//! gateway crate ships in-memory reference implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::key::SessionKey;

/// Durable conversation metadata, keyed by session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Free-form metadata owned by the transport layer.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait::async_trait]
pub trait ThreadStateStore: Send + Sync {
    async fn get(&self, key: &SessionKey) -> Result<Option<ThreadState>>;
    async fn put(&self, key: &SessionKey, state: ThreadState) -> Result<()>;
    async fn delete(&self, key: &SessionKey) -> Result<()>;
}

/// A scheduled prompt delivered by the scheduler's wake cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub key: SessionKey,
    pub prompt: String,
    pub due_at: DateTime<Utc>,
    /// Repeat interval in seconds; `None` means one-shot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_secs: Option<u64>,
}

#[async_trait::async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create(&self, schedule: Schedule) -> Result<()>;
    async fn get(&self, id: &Uuid) -> Result<Option<Schedule>>;
    async fn update(&self, schedule: Schedule) -> Result<()>;
    async fn delete(&self, id: &Uuid) -> Result<()>;
    async fn list(&self) -> Result<Vec<Schedule>>;
    /// Schedules due at or before `as_of`, for the scheduler wake cycle.
    async fn get_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Schedule>>;
}

/// Reverse map from conversation key to the inbound transport
/// correlation id. Entries expire after 30 days.
#[async_trait::async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn put(&self, key: &SessionKey, correlation_id: &str) -> Result<()>;
    async fn get(&self, key: &SessionKey) -> Result<Option<String>>;
    async fn delete(&self, key: &SessionKey) -> Result<()>;

    /// Remove expired entries; returns how many were dropped. Drivers
    /// whose backend expires entries itself keep the default no-op.
    async fn sweep_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Correlation entries expire after this many days.
pub const CORRELATION_TTL_DAYS: i64 = 30;
