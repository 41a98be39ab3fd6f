//! Process-wide registry of live connections, keyed by session.
//!
//! The session handler that accepted a connection owns its entry: it
//! registers on handshake and unregisters when the grace period after a
//! disconnect expires. Everyone else (the notifier in particular) only
//! reads.
//!
//! # Reconnects
//!
//! A reconnecting client registers under the same `SessionId` and simply
//! replaces the old entry. Each registration gets a `ConnectionToken`, and
//! `unregister` only removes the entry if it still belongs to that token,
//! so a stale connection shutting down never evicts its replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use deploy_core::SessionId;

use crate::connection::SharedConnection;

/// Maximum number of sessions the registry can hold.
pub const MAX_SESSIONS: usize = 256;

/// Errors from registry writes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull { max: usize },
}

/// Identifies one registration of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionToken {
    session_id: SessionId,
    id: u64,
}

impl ConnectionToken {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Monotonic registration number, unique within one registry.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Entry {
    id: u64,
    handle: SharedConnection,
}

/// Cheap-to-clone handle on the shared session → connection map.
#[derive(Clone)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<SessionId, Entry>>>,
    next_id: Arc<AtomicU64>,
    max_sessions: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }

    /// Creates a registry holding at most `max_sessions` sessions.
    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            max_sessions,
        }
    }

    /// Registers `handle` as the live connection for `session_id`,
    /// replacing any previous one.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if this is a new session and the
    ///   registry is at capacity. Replacing an existing session always
    ///   succeeds.
    pub async fn register(
        &self,
        session_id: SessionId,
        handle: SharedConnection,
    ) -> Result<ConnectionToken, RegistryError> {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&session_id) && entries.len() >= self.max_sessions {
            return Err(RegistryError::RegistryFull {
                max: self.max_sessions,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let replaced = entries
            .insert(session_id.clone(), Entry { id, handle })
            .is_some();

        debug!(
            session_id = %session_id,
            connection = id,
            replaced,
            "Registered connection"
        );

        Ok(ConnectionToken { session_id, id })
    }

    /// Returns the current connection for a session.
    pub async fn get(&self, session_id: &SessionId) -> Option<SharedConnection> {
        let entries = self.entries.read().await;
        entries.get(session_id).map(|entry| Arc::clone(&entry.handle))
    }

    /// Removes the registration identified by `token`.
    ///
    /// Returns false (and leaves the map untouched) if the session has been
    /// re-registered since, or is already gone.
    pub async fn unregister(&self, token: &ConnectionToken) -> bool {
        let mut entries = self.entries.write().await;

        match entries.get(&token.session_id) {
            Some(entry) if entry.id == token.id => {
                entries.remove(&token.session_id);
                debug!(
                    session_id = %token.session_id,
                    connection = token.id,
                    "Unregistered connection"
                );
                true
            }
            Some(entry) => {
                debug!(
                    session_id = %token.session_id,
                    connection = token.id,
                    current = entry.id,
                    "Skipping unregister, session was re-registered"
                );
                false
            }
            None => false,
        }
    }

    /// Returns true if `token` is still the session's live registration.
    pub async fn is_current(&self, token: &ConnectionToken) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&token.session_id)
            .is_some_and(|entry| entry.id == token.id)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of registered session ids.
    pub async fn sessions(&self) -> Vec<SessionId> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Drops every registration.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
