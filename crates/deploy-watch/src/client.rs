//! Daemon connection client for deploy-watch.
//!
//! This module provides the `WatchClient` which handles:
//! - Connection to the daemon via Unix socket, as a named session
//! - Automatic reconnection with exponential backoff
//! - Forwarding progress events to the caller over an mpsc channel
//!
//! The session id is sent again on every reconnect, so the daemon keeps
//! routing the deployment's updates to this client across drops.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WatchError};
use deploy_core::{DeploymentId, SessionId, Stage, StageStatus};
use deploy_protocol::{ClientMessage, ProgressEvent, ProtocolVersion, ServerMessage};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the watch client.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Session this client subscribes as.
    pub session_id: SessionId,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,
}

impl WatchConfig {
    /// Creates a configuration with the default retry policy
    /// (1s initial, 30s max, doubling).
    pub fn new(socket_path: impl Into<PathBuf>, session_id: SessionId) -> Self {
        Self {
            socket_path: socket_path.into(),
            session_id,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }

    /// Delay to use after a failed attempt that waited `delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.retry_max_delay)
    }
}

/// Demo run requested once the first handshake succeeds.
#[derive(Debug, Clone, Default)]
pub struct SimulateRequest {
    pub deployment_id: Option<DeploymentId>,
    pub fail_at: Option<Stage>,
}

// ============================================================================
// Events
// ============================================================================

/// What the client reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Handshake completed; the daemon now routes this session here.
    Connected {
        client_id: String,
        session_id: SessionId,
    },

    /// A `deployment_progress` message arrived.
    Progress(ProgressEvent),

    /// The connection ended; the client is reconnecting.
    Disconnected,
}

impl WatchEvent {
    /// True for the last event of a deployment: a `cloud_deployment`
    /// success or any error.
    pub fn is_final(&self) -> bool {
        match self {
            WatchEvent::Progress(event) => {
                event.status == StageStatus::Error
                    || (event.stage == Stage::CloudDeployment
                        && event.status == StageStatus::Success)
            }
            _ => false,
        }
    }
}

// ============================================================================
// Watch Client
// ============================================================================

/// Client following one session on the progress daemon.
///
/// # Connection Lifecycle
///
/// 1. Client attempts to connect to the Unix socket
/// 2. On success, sends `Connect { session_id }` and waits for `Connected`
/// 3. On the first successful handshake, sends the pending `Simulate` request
/// 4. Reads messages in a loop, forwarding progress events
/// 5. On disconnect, reports `Disconnected` and retries with exponential backoff
pub struct WatchClient {
    config: WatchConfig,

    event_tx: mpsc::UnboundedSender<WatchEvent>,

    /// Cleared once sent so a reconnect never restarts the demo.
    simulate: Mutex<Option<SimulateRequest>>,

    cancel_token: CancellationToken,
}

impl WatchClient {
    #[must_use]
    pub fn new(
        config: WatchConfig,
        event_tx: mpsc::UnboundedSender<WatchEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            simulate: Mutex::new(None),
            cancel_token,
        }
    }

    /// Asks the daemon to run the demo pipeline after connecting.
    #[must_use]
    pub fn with_simulation(mut self, request: SimulateRequest) -> Self {
        self.simulate = Mutex::new(Some(request));
        self
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Main loop that maintains the session.
    ///
    /// Runs until the cancellation token is triggered.
    pub async fn run(&self) {
        info!(
            socket_path = %self.config.socket_path.display(),
            session_id = %self.config.session_id,
            "Watch client starting"
        );

        loop {
            if self.cancel_token.is_cancelled() {
                info!("Watch client shutting down (cancelled)");
                return;
            }

            match self.connect_with_retry().await {
                Ok(stream) => {
                    if let Err(e) = self.handle_connection(stream).await {
                        warn!(error = %e, "Connection ended with error");
                        self.pause(self.config.retry_initial_delay).await;
                    }
                }
                Err(e) => {
                    if !self.cancel_token.is_cancelled() {
                        error!(error = %e, "Failed to connect to daemon");
                    }
                }
            }

            if self.cancel_token.is_cancelled() {
                info!("Watch client shutting down (cancelled)");
                return;
            }
        }
    }

    /// Attempts to connect with exponential backoff.
    ///
    /// Retries until successful or cancelled.
    async fn connect_with_retry(&self) -> Result<UnixStream> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            debug!(
                attempt,
                socket_path = %self.config.socket_path.display(),
                "Attempting to connect to daemon"
            );

            if !self.config.socket_path.exists() {
                if attempt == 1 {
                    warn!(
                        socket_path = %self.config.socket_path.display(),
                        "Daemon socket not found, will retry"
                    );
                }
            } else {
                match UnixStream::connect(&self.config.socket_path).await {
                    Ok(stream) => {
                        debug!(attempt, "Connection successful");
                        return Ok(stream);
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Connection attempt failed");
                    }
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    delay = self.config.next_delay(delay);
                }
                _ = self.cancel_token.cancelled() => {
                    info!("Connection retry cancelled");
                    return Err(WatchError::DaemonConnection("cancelled".to_string()));
                }
            }
        }
    }

    /// Handshake, optional demo request, then the read loop.
    ///
    /// `Disconnected` is reported only for connections that completed
    /// the handshake.
    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let (client_id, session_id) = self.handshake(&mut reader, &mut writer).await?;
        let _ = self.event_tx.send(WatchEvent::Connected {
            client_id,
            session_id,
        });

        let result = self.serve_session(&mut reader, &mut writer).await;

        let _ = self.event_tx.send(WatchEvent::Disconnected);
        result
    }

    async fn serve_session(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let pending = self.simulate.lock().await.clone();
        if let Some(request) = pending {
            let msg = ClientMessage::simulate(request.deployment_id, request.fail_at);
            send_message(writer, &msg).await?;
            // Cleared only once written, so a failed write is retried on reconnect.
            self.simulate.lock().await.take();
        }

        self.message_loop(reader).await
    }

    /// Sends `Connect` and waits for the daemon's answer.
    async fn handshake(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(String, SessionId)> {
        let connect_msg = ClientMessage::connect(self.config.session_id.clone(), None);
        send_message(writer, &connect_msg).await?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(WatchError::DaemonConnection(
                "connection closed during handshake".to_string(),
            ));
        }

        let response: ServerMessage = serde_json::from_str(line.trim())?;
        match response {
            ServerMessage::Connected {
                protocol_version,
                client_id,
                session_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(WatchError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(
                    client_id = %client_id,
                    session_id = %session_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                Ok((client_id, session_id))
            }
            ServerMessage::Rejected {
                reason,
                protocol_version,
            } => {
                if ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    Err(WatchError::Rejected(reason))
                } else {
                    Err(WatchError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    })
                }
            }
            ServerMessage::Error { message, .. } => Err(WatchError::Rejected(message)),
            other => Err(WatchError::ProtocolError(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Reads daemon messages until EOF, error or cancellation.
    async fn message_loop(&self, reader: &mut BufReader<OwnedReadHalf>) -> Result<()> {
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                read_result = reader.read_line(&mut line) => {
                    match read_result {
                        Ok(0) => {
                            info!("Daemon closed connection");
                            return Ok(());
                        }
                        Ok(_) => {
                            if let Err(e) = self.handle_message(line.trim()) {
                                warn!(error = %e, line = %line.trim(), "Failed to handle message");
                            }
                        }
                        Err(e) => return Err(WatchError::Io(e)),
                    }
                }

                _ = self.cancel_token.cancelled() => {
                    debug!("Message loop cancelled");
                    return Ok(());
                }
            }
        }
    }

    fn handle_message(&self, line: &str) -> Result<()> {
        let message: ServerMessage = serde_json::from_str(line)?;

        match message {
            ServerMessage::DeploymentProgress(event) => {
                debug!(
                    deployment_id = %event.deployment_id,
                    stage = %event.stage,
                    status = %event.status,
                    "Received progress"
                );
                let _ = self.event_tx.send(WatchEvent::Progress(event));
            }
            ServerMessage::SimulationStarted { deployment_id } => {
                info!(deployment_id = %deployment_id, "Simulation started");
            }
            ServerMessage::Pong { seq } => {
                debug!(seq, "Received pong");
            }
            ServerMessage::Error { message, code } => {
                warn!(
                    error_message = %message,
                    error_code = ?code,
                    "Received error from daemon"
                );
            }
            ServerMessage::Connected { .. } | ServerMessage::Rejected { .. } => {
                warn!("Received unexpected handshake message after connection");
            }
        }

        Ok(())
    }

    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.cancel_token.cancelled() => {}
        }
    }
}

/// Writes one newline-terminated JSON message.
async fn send_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &ClientMessage,
) -> Result<()> {
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    debug!(message_type = ?message.message, "Sent message to daemon");
    Ok(())
}
