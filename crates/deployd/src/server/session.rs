//! Per-client session handling.
//!
//! Each accepted socket gets a `SessionHandler` that:
//! - Performs the handshake and learns the client's `SessionId`
//! - Registers a `SocketConnection` for that session in the registry
//! - Answers pings and starts demo pipelines on request
//! - On disconnect, keeps the registration for a grace period so the
//!   notifier can find the replacement when the client comes back
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.
//! Connection errors are logged and result in graceful disconnect.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use deploy_core::{DeploymentId, SessionId, Stage};
use deploy_protocol::{ClientMessage, MessageType, ProtocolVersion, ServerMessage};

use crate::config::DaemonConfig;
use crate::connection::{ConnectionHandle, ConnectionState, SendError};
use crate::notifier::Notifier;
use crate::pipeline::{simulate, SimulationPlan};
use crate::registry::{ConnectionRegistry, ConnectionToken};

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// The write half of a client socket, usable as a `ConnectionHandle`.
///
/// Shared between the session handler (for its own replies) and the
/// registry (for notifier pushes). Writes are serialized by the mutex so
/// lines never interleave.
pub struct SocketConnection {
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    state: AtomicU8,
}

impl SocketConnection {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Writes one newline-terminated JSON line.
    async fn write_line(&self, json: &str) -> Result<(), SendError> {
        if self.current_state() == ConnectionState::Disconnected {
            return Err(SendError::Closed("connection closed".to_string()));
        }

        let mut writer = self.writer.lock().await;

        let result = timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let err = SendError::from_io(&e);
                if err.is_closed() {
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(err)
            }
            Err(_) => Err(SendError::WriteTimeout),
        }
    }

    async fn send_message(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let json = serde_json::to_string(msg).map_err(|e| SendError::Serialize(e.to_string()))?;
        self.write_line(&json).await
    }

    /// Marks the connection closed and shuts down the write half.
    ///
    /// The registry may keep this handle through the reconnect grace
    /// period; shutting down here is what lets the client see EOF.
    pub async fn close(&self) {
        self.set_state(ConnectionState::Disconnected);
        let mut writer = self.writer.lock().await;
        match timeout(WRITE_TIMEOUT, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Socket shutdown failed"),
            Err(_) => debug!("Socket shutdown timed out"),
        }
    }
}

#[async_trait]
impl ConnectionHandle for SocketConnection {
    fn state(&self) -> Option<ConnectionState> {
        Some(self.current_state())
    }

    async fn send_json(&self, payload: &serde_json::Value) -> Result<(), SendError> {
        let json =
            serde_json::to_string(payload).map_err(|e| SendError::Serialize(e.to_string()))?;
        self.write_line(&json).await
    }
}

/// Handler for a single client socket.
pub struct SessionHandler {
    reader: BufReader<OwnedReadHalf>,
    connection: Arc<SocketConnection>,
    registry: ConnectionRegistry,
    config: Arc<DaemonConfig>,
    cancel_token: CancellationToken,

    /// Registration created by the handshake
    token: Option<ConnectionToken>,

    /// Unique client identifier (assigned after handshake)
    client_id: Option<String>,

    connection_number: u64,
}

impl SessionHandler {
    /// Creates a new session handler.
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        registry: ConnectionRegistry,
        config: Arc<DaemonConfig>,
        cancel_token: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            connection: Arc::new(SocketConnection::new(writer)),
            registry,
            config,
            cancel_token,
            token: None,
            client_id: None,
            connection_number,
        }
    }

    /// Runs the handler until the client goes away.
    ///
    /// Returns the registration token if the handshake succeeded; the
    /// caller decides when to release it.
    pub async fn run(mut self) -> Option<ConnectionToken> {
        debug!(connection = self.connection_number, "New client connected");

        match self.handle_handshake().await {
            Ok(()) => {
                info!(
                    client_id = ?self.client_id,
                    session_id = ?self.token.as_ref().map(|t| t.session_id().to_string()),
                    "Client handshake completed"
                );
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
                self.connection.close().await;
                return self.token.take();
            }
        }

        if let Err(e) = self.process_messages().await {
            debug!(
                client_id = ?self.client_id,
                error = %e,
                "Connection closed"
            );
        }

        self.connection.close().await;
        info!(client_id = ?self.client_id, "Client disconnected");
        self.token.take()
    }

    /// Expects `Connect`, validates version and session, registers the
    /// connection and replies `Connected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(ServerMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        let (session_id, client_id) = match msg.message {
            MessageType::Connect {
                session_id,
                client_id,
            } => (session_id, client_id),
            other => {
                self.send_message(ServerMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;
                return Err(ConnectionError::UnexpectedMessage(format!("{other:?}")));
            }
        };

        let session_id = match SessionId::parse(session_id.as_str()) {
            Ok(id) => id,
            Err(e) => {
                self.send_message(ServerMessage::rejected(&e.to_string()))
                    .await?;
                return Err(ConnectionError::Rejected(e.to_string()));
            }
        };

        // Registered while still Connecting: a notifier that finds it now
        // backs off instead of racing our Connected reply.
        let handle: Arc<dyn ConnectionHandle> = Arc::clone(&self.connection) as _;
        let token = match self.registry.register(session_id.clone(), handle).await {
            Ok(token) => token,
            Err(e) => {
                self.send_message(ServerMessage::rejected(&e.to_string()))
                    .await?;
                return Err(ConnectionError::Rejected(e.to_string()));
            }
        };
        self.token = Some(token);

        let assigned_id =
            client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
        self.client_id = Some(assigned_id.clone());

        self.send_message(ServerMessage::connected(assigned_id, session_id))
            .await?;
        self.connection.set_state(ConnectionState::Connected);

        Ok(())
    }

    /// Main message processing loop.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let cancel_token = self.cancel_token.clone();

        loop {
            let msg = tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!(client_id = ?self.client_id, "Session handler cancelled");
                    return Ok(());
                }
                result = timeout(READ_TIMEOUT, self.read_message()) => match result {
                    Ok(Ok(msg)) => msg,
                    Ok(Err(ConnectionError::Eof)) => {
                        debug!(client_id = ?self.client_id, "Client sent EOF");
                        return Ok(());
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        debug!(client_id = ?self.client_id, "Connection timed out");
                        return Err(ConnectionError::Timeout);
                    }
                }
            };

            if let Err(e) = self.handle_message(msg).await {
                if matches!(e, ConnectionError::Eof) {
                    return Ok(());
                }

                error!(
                    client_id = ?self.client_id,
                    error = %e,
                    "Error handling message"
                );

                // Send error response but continue processing
                let _ = self
                    .send_message(ServerMessage::error(&e.to_string()))
                    .await;
            }
        }
    }

    /// Handles a single client message.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(ServerMessage::error("Already connected"))
                    .await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(ServerMessage::pong(seq)).await?;
            }

            MessageType::Simulate {
                deployment_id,
                fail_at,
            } => {
                self.start_simulation(deployment_id, fail_at).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Replies `SimulationStarted` and runs the demo pipeline in the
    /// background against this session.
    async fn start_simulation(
        &mut self,
        deployment_id: Option<DeploymentId>,
        fail_at: Option<Stage>,
    ) -> Result<(), ConnectionError> {
        let Some(token) = &self.token else {
            return Err(ConnectionError::UnexpectedMessage(
                "Simulate before handshake".to_string(),
            ));
        };
        let session_id = token.session_id().clone();

        let deployment_id = deployment_id.unwrap_or_else(|| {
            DeploymentId::new(format!(
                "deploy-{}-{}",
                session_id.short(),
                chrono::Utc::now().timestamp_millis()
            ))
        });

        self.send_message(ServerMessage::simulation_started(deployment_id.clone()))
            .await?;

        let mut notifier =
            Notifier::for_registry(session_id, deployment_id, self.registry.clone())
                .with_config(self.config.notifier.clone());
        let plan = SimulationPlan {
            step_delay: self.config.simulation.step_delay(),
            fail_at,
        };

        tokio::spawn(async move {
            let result = simulate(&mut notifier, &plan).await;
            debug!(
                deployment_id = %notifier.deployment_id(),
                result = ?result,
                "Simulation task finished"
            );
        });

        Ok(())
    }

    /// Reads a single message from the client.
    ///
    /// At most `MAX_MESSAGE_SIZE + 1` bytes are buffered; anything longer
    /// is refused before the rest of the line is read.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();
        let limit = MAX_MESSAGE_SIZE as u64 + 1;

        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if bytes_read as u64 == limit && !line.ends_with('\n') {
            return Err(ConnectionError::MessageTooLarge {
                size: bytes_read,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&self, msg: ServerMessage) -> Result<(), ConnectionError> {
        self.connection
            .send_message(&msg)
            .await
            .map_err(ConnectionError::from)
    }
}

/// Keeps `token` registered for `grace`, then releases it unless a
/// reconnect has replaced it in the meantime.
pub async fn release_after_grace(
    registry: ConnectionRegistry,
    token: ConnectionToken,
    grace: Duration,
    cancel_token: CancellationToken,
) {
    tokio::select! {
        _ = sleep(grace) => {}
        _ = cancel_token.cancelled() => {}
    }

    if registry.unregister(&token).await {
        debug!(
            session_id = %token.session_id(),
            connection = token.id(),
            "Released session after reconnect grace period"
        );
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl From<SendError> for ConnectionError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Closed(_) => Self::Eof,
            other => Self::Io(other.to_string()),
        }
    }
}
