//! Integration tests for the progress server.
//!
//! These run a real `DeploymentServer` on a temporary Unix socket and talk
//! to it the way a watch client does, then push updates through a
//! `Notifier` reading the server's registry.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::path::PathBuf;
use std::time::Duration;

use deploy_core::{DeploymentId, SessionId, Stage, StageStatus};
use deploy_protocol::{ClientMessage, MessageType, ProgressEvent, ProtocolVersion, ServerMessage};
use deployd::config::{DaemonConfig, NotifierConfig, SimulationConfig};
use deployd::server::DeploymentServer;
use deployd::{ConnectionHandle, ConnectionRegistry, ConnectionState, Notifier};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    socket_path: PathBuf,
    registry: ConnectionRegistry,
    cancel_token: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with_grace(30).await
    }

    async fn spawn_with_grace(reconnect_grace_secs: u64) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let config = DaemonConfig {
            socket_path: socket_path.clone(),
            reconnect_grace_secs,
            notifier: NotifierConfig::default(),
            simulation: SimulationConfig { step_delay_ms: 1 },
            state_dir: temp_dir.path().to_path_buf(),
        };

        let registry = ConnectionRegistry::new();
        let cancel_token = CancellationToken::new();
        let server = DeploymentServer::new(config, registry.clone(), cancel_token.clone());

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }

        assert!(socket_path.exists(), "Server socket did not appear");

        TestServer {
            socket_path,
            registry,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake as `session`.
    async fn connect_as(&self, session: &str) -> TestClient {
        let mut client = self.connect().await;
        client
            .send(ClientMessage::connect(SessionId::new(session), None))
            .await;
        match client.recv().await {
            ServerMessage::Connected { session_id, .. } => {
                assert_eq!(session_id.as_str(), session);
            }
            other => panic!("Expected Connected, got {other:?}"),
        }
        client
    }

    fn notifier(&self, session: &str) -> Notifier {
        Notifier::for_registry(
            SessionId::new(session),
            DeploymentId::new("dep-test"),
            self.registry.clone(),
        )
    }

    /// Waits until the session's registered connection reports `state`.
    async fn wait_for_state(&self, session: &str, state: ConnectionState) {
        let session = SessionId::new(session);
        let start = tokio::time::Instant::now();
        while start.elapsed() < RECV_TIMEOUT {
            if let Some(conn) = self.registry.get(&session).await {
                if conn.state() == Some(state) {
                    return;
                }
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("session {session} never reached {state:?}");
    }

    fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.writer.write_all(json.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for server message")
            .unwrap();
        assert!(n > 0, "server closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    async fn recv_progress(&mut self) -> ProgressEvent {
        match self.recv().await {
            ServerMessage::DeploymentProgress(event) => event,
            other => panic!("Expected DeploymentProgress, got {other:?}"),
        }
    }

    /// Returns true if the server closed the connection.
    async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_registers_session() {
    let server = TestServer::spawn().await;
    let _client = server.connect_as("session-a").await;

    server
        .wait_for_state("session-a", ConnectionState::Connected)
        .await;
    assert_eq!(server.registry.sessions().await, vec![SessionId::new("session-a")]);

    server.shutdown();
}

#[tokio::test]
async fn test_incompatible_version_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let mut msg = ClientMessage::connect(SessionId::new("session-a"), None);
    msg.protocol_version = ProtocolVersion::new(9, 0);
    client.send(msg).await;

    match client.recv().await {
        ServerMessage::Rejected { reason, .. } => assert!(reason.contains("9.0")),
        other => panic!("Expected Rejected, got {other:?}"),
    }
    assert!(client.is_closed().await);
    assert!(server.registry.is_empty().await);

    server.shutdown();
}

#[tokio::test]
async fn test_handshake_requires_connect() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::ping(1)).await;

    assert!(matches!(client.recv().await, ServerMessage::Error { .. }));
    assert!(client.is_closed().await);

    server.shutdown();
}

#[tokio::test]
async fn test_blank_session_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage::connect(SessionId::new("  "), None))
        .await;

    assert!(matches!(client.recv().await, ServerMessage::Rejected { .. }));
    assert!(server.registry.is_empty().await);

    server.shutdown();
}

#[tokio::test]
async fn test_ping_pong_and_repeat_connect() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_as("session-a").await;

    client.send(ClientMessage::ping(7)).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { seq: 7 }));

    client
        .send(ClientMessage::connect(SessionId::new("session-a"), None))
        .await;
    assert!(matches!(client.recv().await, ServerMessage::Error { .. }));

    server.shutdown();
}

// ============================================================================
// Notifier Delivery Over The Socket
// ============================================================================

#[tokio::test]
async fn test_notifier_reaches_connected_client() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_as("session-a").await;
    server
        .wait_for_state("session-a", ConnectionState::Connected)
        .await;

    let notifier = server.notifier("session-a");
    notifier
        .update_progress(Stage::ContainerBuild, "Building...", 42)
        .await;

    let event = client.recv_progress().await;
    assert_eq!(event.stage, Stage::ContainerBuild);
    assert_eq!(event.status, StageStatus::InProgress);
    assert_eq!(event.progress, Some(42));
    assert_eq!(event.deployment_id.as_str(), "dep-test");

    server.shutdown();
}

#[tokio::test]
async fn test_update_for_unknown_session_is_dropped() {
    let server = TestServer::spawn().await;

    let outcome = server
        .notifier("nobody")
        .send_update("repo_clone", StageStatus::InProgress, "Cloning", None, None)
        .await;
    assert!(!outcome.is_delivered());

    server.shutdown();
}

#[tokio::test]
async fn test_update_survives_client_reconnect() {
    let server = TestServer::spawn().await;

    let first = server.connect_as("session-a").await;
    drop(first);
    server
        .wait_for_state("session-a", ConnectionState::Disconnected)
        .await;

    // The registry still holds the dead connection: the first attempt sees
    // it unready, backs off, and finds the replacement on retry.
    let notifier = server.notifier("session-a");
    let send = tokio::spawn(async move {
        notifier
            .send_update(
                "cloud_deployment",
                StageStatus::Success,
                "Deployed",
                None,
                None,
            )
            .await
    });

    let mut second = server.connect_as("session-a").await;
    let event = second.recv_progress().await;
    assert_eq!(event.stage, Stage::CloudDeployment);
    assert_eq!(event.message, "Deployed");

    let outcome = send.await.unwrap();
    assert!(outcome.is_delivered());

    server.shutdown();
}

#[tokio::test]
async fn test_stale_disconnect_keeps_replacement_registered() {
    let server = TestServer::spawn_with_grace(0).await;

    let first = server.connect_as("session-a").await;
    let mut second = server.connect_as("session-a").await;
    server
        .wait_for_state("session-a", ConnectionState::Connected)
        .await;

    // First connection goes away and its (zero) grace period expires
    drop(first);
    sleep(Duration::from_millis(100)).await;

    let mut notifier = server.notifier("session-a");
    notifier.start_stage(Stage::RepoClone, "Cloning").await;

    let event = second.recv_progress().await;
    assert_eq!(event.stage, Stage::RepoClone);

    server.shutdown();
}

#[tokio::test]
async fn test_session_released_after_grace() {
    let server = TestServer::spawn_with_grace(0).await;

    let client = server.connect_as("session-a").await;
    server
        .wait_for_state("session-a", ConnectionState::Connected)
        .await;
    drop(client);

    let start = tokio::time::Instant::now();
    while start.elapsed() < RECV_TIMEOUT && !server.registry.is_empty().await {
        sleep(POLL_INTERVAL).await;
    }
    assert!(server.registry.is_empty().await);

    server.shutdown();
}

// ============================================================================
// Demo Pipeline
// ============================================================================

#[tokio::test]
async fn test_simulation_streams_all_stages() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_as("session-a").await;
    server
        .wait_for_state("session-a", ConnectionState::Connected)
        .await;

    client
        .send(ClientMessage::simulate(Some(DeploymentId::new("dep-sim")), None))
        .await;
    match client.recv().await {
        ServerMessage::SimulationStarted { deployment_id } => {
            assert_eq!(deployment_id.as_str(), "dep-sim");
        }
        other => panic!("Expected SimulationStarted, got {other:?}"),
    }

    let mut events = Vec::new();
    loop {
        let event = client.recv_progress().await;
        let done = event.stage == Stage::CloudDeployment && event.status.is_terminal();
        events.push(event);
        if done {
            break;
        }
    }

    assert_eq!(events.len(), Stage::STANDARD.len() * 4);
    assert!(events.iter().all(|e| e.deployment_id.as_str() == "dep-sim"));

    let completed: Vec<&ProgressEvent> = events
        .iter()
        .filter(|e| e.status == StageStatus::Success)
        .collect();
    assert_eq!(completed.len(), 6);
    assert!(completed.iter().all(|e| e.detail_str("duration").is_some()));

    server.shutdown();
}

#[tokio::test]
async fn test_simulation_failure_stops_pipeline() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_as("session-a").await;
    server
        .wait_for_state("session-a", ConnectionState::Connected)
        .await;

    client
        .send(ClientMessage::new(MessageType::Simulate {
            deployment_id: None,
            fail_at: Some(Stage::SecurityScan),
        }))
        .await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::SimulationStarted { .. }
    ));

    let last = loop {
        let event = client.recv_progress().await;
        if event.status == StageStatus::Error {
            break event;
        }
        assert_ne!(event.stage, Stage::ContainerBuild, "pipeline ran past failure");
    };
    assert_eq!(last.stage, Stage::SecurityScan);

    server.shutdown();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let server = TestServer::spawn().await;
    let _client = server.connect_as("session-a").await;
    let socket_path = server.socket_path.clone();
    let registry = server.registry.clone();

    server.shutdown();

    let start = tokio::time::Instant::now();
    while start.elapsed() < RECV_TIMEOUT && socket_path.exists() {
        sleep(POLL_INTERVAL).await;
    }
    assert!(!socket_path.exists());
    assert!(registry.is_empty().await);
}
