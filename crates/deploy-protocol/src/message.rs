//! Protocol message types for daemon communication.

use crate::event::ProgressEvent;
use crate::version::ProtocolVersion;
use deploy_core::{DeploymentId, SessionId, Stage};
use serde::{Deserialize, Serialize};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake identifying the session this connection belongs to
    Connect {
        /// Session that survives reconnects
        session_id: SessionId,
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Run the demo pipeline against this session
    Simulate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deployment_id: Option<DeploymentId>,
        /// Stage at which the demo reports an error instead of succeeding
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail_at: Option<Stage>,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(session_id: SessionId, client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect {
            session_id,
            client_id,
        })
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a simulate request.
    pub fn simulate(deployment_id: Option<DeploymentId>, fail_at: Option<Stage>) -> Self {
        Self::new(MessageType::Simulate {
            deployment_id,
            fail_at,
        })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
        /// Session the connection was registered under
        session_id: SessionId,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Demo pipeline accepted and running
    SimulationStarted { deployment_id: DeploymentId },

    /// Progress report for a deployment stage
    DeploymentProgress(ProgressEvent),
}

impl ServerMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String, session_id: SessionId) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
            session_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    pub fn simulation_started(deployment_id: DeploymentId) -> Self {
        Self::SimulationStarted { deployment_id }
    }

    /// Wraps a progress event in its wire envelope.
    pub fn progress(event: ProgressEvent) -> Self {
        Self::DeploymentProgress(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::StageStatus;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::connect(SessionId::new("sess-1"), None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connect\""));
        assert!(json.contains("\"session_id\":\"sess-1\""));
        assert!(!json.contains("client_id"));
    }

    #[test]
    fn test_progress_envelope_shape() {
        let event = ProgressEvent::new(
            DeploymentId::new("dep-9"),
            Stage::RepoClone,
            StageStatus::Success,
            "Cloned",
        );
        let value = serde_json::to_value(ServerMessage::progress(event)).unwrap();

        assert_eq!(value["type"], "deployment_progress");
        assert_eq!(value["deployment_id"], "dep-9");
        assert_eq!(value["stage"], "repo_clone");
        assert_eq!(value["status"], "success");
        assert_eq!(value["message"], "Cloned");
        assert!(value.get("timestamp").is_some());

        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn test_progress_roundtrip() {
        let event = ProgressEvent::new(
            DeploymentId::new("dep-9"),
            Stage::from_name("lint"),
            StageStatus::InProgress,
            "Linting",
        )
        .with_progress(Some(10));
        let json = serde_json::to_string(&ServerMessage::progress(event.clone())).unwrap();

        match serde_json::from_str::<ServerMessage>(&json).unwrap() {
            ServerMessage::DeploymentProgress(parsed) => assert_eq!(parsed, event),
            other => panic!("Expected DeploymentProgress, got {other:?}"),
        }
    }

    #[test]
    fn test_simulate_defaults() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"protocol_version":{"major":1,"minor":0},"type":"simulate"}"#)
                .unwrap();
        match msg.message {
            MessageType::Simulate {
                deployment_id,
                fail_at,
            } => {
                assert!(deployment_id.is_none());
                assert!(fail_at.is_none());
            }
            _ => panic!("Expected Simulate message"),
        }
    }
}
