//! The session registry — create-on-demand session contexts with
//! per-key creation serialization and cooperative eviction.
//!
//! `resolve` holds an exclusive per-key gate while the factory runs,
//! so N concurrent resolves for the same key invoke the factory at
//! most once; `clean` takes the same gate, so cleaning a key that is
//! mid-create serializes after the create.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use pal_domain::error::{Error, Result};
use pal_domain::key::SessionKey;

use crate::session::SessionContext;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionKey, Arc<SessionContext>>,
    /// Per-key creation gates. A gate exists while any resolve/clean
    /// for that key is in flight.
    gates: HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>,
    closed: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, key: &SessionKey) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::RegistryClosed);
        }
        Ok(inner
            .gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Return the existing session for `key`, or run `factory` under
    /// the key's exclusive gate to create one.
    ///
    /// A factory error propagates and leaves no entry behind.
    pub async fn resolve<F, Fut>(&self, key: &SessionKey, factory: F) -> Result<Arc<SessionContext>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionContext>>,
    {
        // Fast path: session already exists.
        {
            let inner = self.inner.lock();
            if inner.closed {
                return Err(Error::RegistryClosed);
            }
            if let Some(session) = inner.sessions.get(key) {
                return Ok(session.clone());
            }
        }

        let gate = self.gate(key)?;
        let _guard = gate.lock().await;

        // Re-check under the gate: another resolve may have won.
        {
            let inner = self.inner.lock();
            if inner.closed {
                return Err(Error::RegistryClosed);
            }
            if let Some(session) = inner.sessions.get(key) {
                return Ok(session.clone());
            }
        }

        let session = Arc::new(factory().await?);

        let mut inner = self.inner.lock();
        if inner.closed {
            session.dispose();
            return Err(Error::RegistryClosed);
        }
        inner.sessions.insert(key.clone(), session.clone());
        tracing::info!(key = %key, "session created");
        Ok(session)
    }

    /// Look up a session without creating one.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<SessionContext>> {
        self.inner.lock().sessions.get(key).cloned()
    }

    /// Remove and dispose the session for `key`. Serialized after any
    /// in-flight create for the same key. Idempotent.
    pub async fn clean(&self, key: &SessionKey) -> Result<()> {
        let gate = self.gate(key)?;
        let _guard = gate.lock().await;

        let removed = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::RegistryClosed);
            }
            inner.gates.remove(key);
            inner.sessions.remove(key)
        };

        if let Some(session) = removed {
            session.dispose();
            tracing::info!(key = %key, "session cleaned");
        }
        Ok(())
    }

    /// Live session keys.
    pub fn keys(&self) -> Vec<SessionKey> {
        self.inner.lock().sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    /// Close the registry: all further operations fail with
    /// [`Error::RegistryClosed`], and every live session is disposed.
    pub fn close(&self) {
        let sessions: Vec<_> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.gates.clear();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.dispose();
        }
        tracing::info!("session registry closed");
    }
}
