//! Error types for the watch client.
//!
//! None of these are fatal to [`crate::WatchClient::run`]: a failed
//! connection or handshake is logged and retried. They surface through the
//! lower-level connection methods and in log fields.

use std::io;
use thiserror::Error;

/// Watch client errors.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The daemon socket could not be reached, or retrying was cancelled.
    #[error("Failed to connect to daemon: {0}")]
    DaemonConnection(String),

    /// Protocol version mismatch with the daemon.
    ///
    /// Both binaries should come from the same release.
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The daemon refused the handshake (for example a blank session id).
    #[error("Daemon rejected connection: {0}")]
    Rejected(String),

    /// The daemon sent something other than what the handshake expects.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Convenience Result type alias for watch client operations.
pub type Result<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_connection_error_display() {
        let error = WatchError::DaemonConnection("refused".to_string());
        let display = format!("{error}");
        assert!(display.contains("Failed to connect to daemon"));
        assert!(display.contains("refused"));
    }

    #[test]
    fn test_version_mismatch_error_display() {
        let error = WatchError::VersionMismatch {
            client_version: "1.0".to_string(),
            daemon_version: "2.0".to_string(),
        };
        let display = format!("{error}");
        assert!(display.contains("client: 1.0"));
        assert!(display.contains("daemon: 2.0"));
    }

    #[test]
    fn test_rejected_error_display() {
        let error = WatchError::Rejected("session_id must not be empty".to_string());
        assert!(error.to_string().contains("session_id must not be empty"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "socket not found");
        let error: WatchError = io_error.into();
        assert!(matches!(error, WatchError::Io(_)));
    }

    #[test]
    fn test_parse_error_from_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let error: WatchError = json_error.into();
        assert!(matches!(error, WatchError::ParseError(_)));
        assert!(error.to_string().contains("Failed to parse message"));
    }
}
