//! Unix socket server for the deployment progress daemon.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Spawns a SessionHandler for each client
//! - Owns the writes to the `ConnectionRegistry` that notifiers read
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ DeploymentServer │
//! │   UnixListener   │
//! └────────┬─────────┘
//!          │ accept()
//!          ▼
//! ┌──────────────────┐ register ┌────────────────────┐
//! │  SessionHandler  │─────────▶│ ConnectionRegistry │
//! │   (per client)   │          │ session → handle   │
//! └──────────────────┘          └─────────┬──────────┘
//!                                         │ resolve (read-only)
//!                                         ▼
//!                               ┌────────────────────┐
//!                               │      Notifier      │
//!                               └────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.
//! Server errors are logged and allow continued operation.

mod session;

pub use session::{release_after_grace, ConnectionError, SessionHandler, SocketConnection};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::registry::ConnectionRegistry;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/deploy-progress.sock";

/// Unix socket server accepting progress subscribers.
pub struct DeploymentServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Registry shared with every notifier in the process
    registry: ConnectionRegistry,

    config: Arc<DaemonConfig>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,
}

impl DeploymentServer {
    /// Creates a new server listening on `config.socket_path`.
    ///
    /// # Arguments
    ///
    /// * `config` - Daemon configuration (socket path, grace period, notifier policy)
    /// * `registry` - Registry that session handlers write and notifiers read
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        config: DaemonConfig,
        registry: ConnectionRegistry,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            registry,
            config: Arc::new(config),
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns a handle on the registry this server maintains.
    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ServerError::SocketSetup {
                    path: self.socket_path.clone(),
                    error: e.to_string(),
                })?;
            }
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;

        info!(
            socket = %self.socket_path.display(),
            "Progress server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Spawns a session handler for a new client.
    ///
    /// When the handler returns, its registration is kept for the
    /// reconnect grace period before being released.
    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let registry = self.registry.clone();
        let config = Arc::clone(&self.config);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            let handler = SessionHandler::new(
                reader,
                writer,
                registry.clone(),
                Arc::clone(&config),
                cancel_token.clone(),
                connection_number,
            );

            if let Some(token) = handler.run().await {
                debug!(
                    session_id = %token.session_id(),
                    grace_secs = config.reconnect_grace_secs,
                    "Holding session for reconnect"
                );
                release_after_grace(registry, token, config.reconnect_grace(), cancel_token)
                    .await;
            }
        });
    }

    /// Performs cleanup on shutdown.
    async fn cleanup(&self) {
        self.registry.clear().await;

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}
