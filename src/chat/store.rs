//! Per-session controller storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::generation::GenerationClient;

use super::controller::ChatController;

/// A browser session and its conversation.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    last_activity: Arc<RwLock<DateTime<Utc>>>,
    controller: Arc<ChatController>,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<ChatController> {
        &self.controller
    }

    fn touch(&self) {
        *self
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Idle for longer than `timeout`, with no request in flight and
    /// nobody listening for events.
    fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        if self.controller.is_processing() || self.controller.subscriber_count() > 0 {
            return false;
        }
        // A negative span means clock skew; keep the session.
        (Utc::now() - self.last_activity())
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }
}

/// Thread-safe store for sessions.
///
/// Every session gets its own [`ChatController`], so conversations never
/// share history or in-flight state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    sessions: RwLock<HashMap<String, Session>>,
    client: Arc<dyn GenerationClient>,
    max_history_length: usize,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("max_history_length", &self.inner.max_history_length)
            .finish()
    }
}

impl SessionStore {
    /// Create an empty store whose sessions share `client`.
    #[must_use]
    pub fn new(client: Arc<dyn GenerationClient>, max_history_length: usize) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                client,
                max_history_length,
            }),
        }
    }

    /// Create a new session with a random ID.
    #[must_use]
    pub fn create(&self) -> Session {
        self.create_with_id(Uuid::new_v4().to_string())
    }

    /// Create (or replace) a session with a specific ID.
    #[must_use]
    pub fn create_with_id(&self, id: impl Into<String>) -> Session {
        let session = self.new_session(id.into());
        self.write().insert(session.id.clone(), session.clone());
        tracing::debug!(name: "session.created", session_id = %session.id, "Session created");
        session
    }

    /// Get a session by ID and mark it active.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        let session = self.read().get(id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Get a session by ID, creating it if it doesn't exist.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> Session {
        if let Some(session) = self.get(id) {
            return session;
        }

        let mut guard = self.write();
        // Another caller may have created it between the two locks.
        if let Some(session) = guard.get(id) {
            session.touch();
            return session.clone();
        }
        let session = self.new_session(id.to_string());
        guard.insert(session.id.clone(), session.clone());
        session
    }

    fn new_session(&self, id: String) -> Session {
        let now = Utc::now();
        Session {
            id,
            created_at: now,
            last_activity: Arc::new(RwLock::new(now)),
            controller: Arc::new(ChatController::new(
                Arc::clone(&self.inner.client),
                self.inner.max_history_length,
            )),
        }
    }

    /// Remove a session, aborting its in-flight request and ending its
    /// event streams.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.write().remove(id);
        if let Some(session) = &removed {
            session.controller.close();
        }
        removed
    }

    /// Remove sessions that have been idle longer than `timeout`.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut expired = Vec::new();
        self.write().retain(|_, session| {
            if session.is_expired_with_timeout(timeout) {
                expired.push(session.clone());
                false
            } else {
                true
            }
        });

        for session in &expired {
            session.controller.close();
        }
        expired.len()
    }

    /// Sweep idle sessions every `every` on the runtime.
    pub fn spawn_expiry_sweep(&self, timeout: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.cleanup_expired_with_timeout(timeout);
                if removed > 0 {
                    tracing::info!(
                        name: "session.expired",
                        removed,
                        remaining = store.len(),
                        "Removed idle sessions"
                    );
                }
            }
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List all session IDs.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// All sessions, without marking them active.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Session>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
