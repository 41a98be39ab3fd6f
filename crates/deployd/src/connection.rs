//! Transport-agnostic connection handle.
//!
//! A `ConnectionHandle` is the live endpoint for one client. It is owned by
//! whoever accepted the connection (the socket server in this crate); the
//! notifier only borrows it for a single send and never closes it.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Readiness of a connection, for handles that can report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted but handshake not finished
    Connecting,
    Connected,
    /// Peer went away; a reconnect may replace this handle
    Disconnected,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Error text that transports use when the channel was already closed.
const CLOSED_MARKERS: [&str; 4] = [
    "close message has been sent",
    "websocket is closed",
    "connection closed",
    "broken pipe",
];

/// Errors returned by `ConnectionHandle::send_json`.
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel was closed before or during the send
    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl SendError {
    /// Classifies a transport error message, mapping closed-channel
    /// wording to `Closed`.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if CLOSED_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            Self::Closed(message)
        } else {
            Self::Transport(message)
        }
    }

    /// Classifies an I/O error by kind.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Self::Closed(err.to_string()),
            _ => Self::from_message(err.to_string()),
        }
    }

    /// Returns true if the failure means the channel is gone, so a
    /// replacement connection might succeed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Live endpoint for pushing JSON payloads to one client.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Current readiness, or `None` if the transport cannot tell.
    ///
    /// Handles that return `None` are always sent to.
    fn state(&self) -> Option<ConnectionState> {
        None
    }

    /// Sends one JSON payload.
    async fn send_json(&self, payload: &serde_json::Value) -> Result<(), SendError>;
}

/// Shared, type-erased connection handle.
pub type SharedConnection = Arc<dyn ConnectionHandle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_markers_classify_as_closed() {
        assert!(SendError::from_message(
            "Cannot call \"send\" once a close message has been sent."
        )
        .is_closed());
        assert!(SendError::from_message("WebSocket is closed").is_closed());
        assert!(!SendError::from_message("payload too large").is_closed());
    }

    #[test]
    fn test_io_kinds() {
        let pipe = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(SendError::from_io(&pipe).is_closed());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(!SendError::from_io(&denied).is_closed());
    }

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }
}
