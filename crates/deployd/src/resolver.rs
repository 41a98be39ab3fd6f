//! Resolving the live connection for a session.
//!
//! The notifier never caches a handle: it asks a `ConnectionResolver` on
//! every attempt, because a reconnect can swap the connection between two
//! attempts of the same update.

use async_trait::async_trait;

use deploy_core::SessionId;

use crate::connection::SharedConnection;
use crate::registry::ConnectionRegistry;

/// Looks up the current live connection for a session.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, session_id: &SessionId) -> Option<SharedConnection>;
}

/// Live registry read. Tolerates reconnects.
#[async_trait]
impl ConnectionResolver for ConnectionRegistry {
    async fn resolve(&self, session_id: &SessionId) -> Option<SharedConnection> {
        self.get(session_id).await
    }
}

/// A single handle fixed at construction, whatever the session.
///
/// Useful when the caller already holds the connection and no registry
/// exists. It cannot follow a reconnect; prefer `ConnectionRegistry`.
#[derive(Clone, Default)]
pub struct FixedConnection {
    handle: Option<SharedConnection>,
}

impl FixedConnection {
    pub fn new(handle: SharedConnection) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// A resolver that never finds a connection.
    pub fn none() -> Self {
        Self { handle: None }
    }
}

#[async_trait]
impl ConnectionResolver for FixedConnection {
    async fn resolve(&self, _session_id: &SessionId) -> Option<SharedConnection> {
        self.handle.clone()
    }
}
