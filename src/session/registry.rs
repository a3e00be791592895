//! Registry of live sessions.
//!
//! Maps canonical ids to [`Session`] entries and tracks which session owns
//! which live process handle. The map is the only shared mutable state in
//! this module, guarded by a reader/writer lock; each client instance owns
//! its own registry with explicit construction and teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::session::ids;
use crate::transport::supervisor::{ProcessHandle, ProcessState, ProcessSupervisor};
use crate::{ConduitError, Result};

/// One logical conversation with the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Canonical UUID-form identifier.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Human-supplied alias the id was resolved from, when there was one.
    pub alias: Option<String>,
    /// The live process bound to this session, if an exchange is active.
    /// A session owns at most one handle at a time.
    #[serde(skip)]
    pub handle: Option<ProcessHandle>,
}

impl Session {
    fn new(id: String, alias: Option<String>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            alias,
            handle: None,
        }
    }
}

/// Concurrent registry of live sessions for one client instance.
#[derive(Debug)]
pub struct SessionRegistry {
    supervisor: Arc<ProcessSupervisor>,
    grace: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Build an empty registry that tears sessions down through the given
    /// supervisor with the given grace period.
    #[must_use]
    pub fn new(supervisor: Arc<ProcessSupervisor>, grace: Duration) -> Self {
        Self {
            supervisor,
            grace,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve caller input to a canonical id and return the matching
    /// session, creating it on first use.
    pub async fn resolve_or_create(&self, input: &str) -> Session {
        let id = ids::resolve(input);
        let alias = {
            let trimmed = input.trim();
            (!trimmed.is_empty() && !ids::is_canonical(trimmed)).then(|| trimmed.to_owned())
        };

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(session_id = %id, ?alias, "session created");
                Session::new(id.clone(), alias)
            })
            .clone();
        session
    }

    /// Fetch a session by id or alias, without creating one.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Validation`] for empty input (there is
    /// nothing stable to look up) and `Ok(None)` for an unknown session.
    pub async fn get(&self, input: &str) -> Result<Option<Session>> {
        if input.trim().is_empty() {
            return Err(ConduitError::Validation(
                "session lookup requires a non-empty id or alias".into(),
                None,
            ));
        }
        let id = ids::resolve(input);
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    /// Snapshot of all live sessions.
    pub async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Bind a live process handle to a session.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Validation`] when the session does not exist
    /// or already owns a live handle.
    pub async fn bind_handle(&self, id: &str, handle: ProcessHandle) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| {
            ConduitError::Validation(format!("unknown session `{id}`"), None)
        })?;
        if let Some(ref existing) = session.handle {
            // A terminated handle from a finished exchange is stale and may
            // be replaced; a live one may not.
            if existing.state() != ProcessState::Terminated {
                return Err(ConduitError::Validation(
                    format!("session `{id}` already has an active process"),
                    None,
                ));
            }
        }
        session.handle = Some(handle);
        Ok(())
    }

    /// Release the handle bound to a session without closing the session.
    pub async fn release_handle(&self, id: &str) -> Option<ProcessHandle> {
        self.sessions
            .write()
            .await
            .get_mut(id)
            .and_then(|s| s.handle.take())
    }

    /// Close a session, synchronously tearing down any bound process first.
    ///
    /// Idempotent: closing an unknown or already-closed session is a no-op.
    pub async fn close(&self, input: &str) {
        let id = ids::resolve(input);
        let removed = self.sessions.write().await.remove(&id);
        let Some(session) = removed else {
            debug!(session_id = %id, "close: session not present, nothing to do");
            return;
        };
        if let Some(handle) = session.handle {
            self.supervisor.stop(&handle, self.grace).await;
        }
        info!(session_id = %id, "session closed");
    }

    /// Close every session. Used at client shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}
