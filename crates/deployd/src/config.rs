//! Daemon configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration:
//!
//! ```toml
//! socket_path = "/tmp/deploy-progress.sock"
//! state_dir = "/home/me/.local/state/deploy-progress"
//! reconnect_grace_secs = 30
//!
//! [notifier]
//! max_attempts = 2
//! reconnect_backoff_ms = 500
//!
//! [simulation]
//! step_delay_ms = 300
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::DEFAULT_SOCKET_PATH;

/// Environment variable overriding `socket_path`.
pub const SOCKET_ENV_VAR: &str = "DEPLOY_PROGRESS_SOCKET";

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid config {path}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path of the Unix socket clients connect to
    pub socket_path: PathBuf,

    /// Where the PID file and daemonized log output go
    pub state_dir: PathBuf,

    /// How long a disconnected session stays registered, waiting for the
    /// client to reconnect
    pub reconnect_grace_secs: u64,

    pub notifier: NotifierConfig,

    pub simulation: SimulationConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            state_dir: default_state_dir(),
            reconnect_grace_secs: 30,
            notifier: NotifierConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// `$XDG_STATE_HOME/deploy-progress`, or `/tmp/deploy-progress` where the
/// platform has no state directory.
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("deploy-progress")
}

impl DaemonConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Loads `explicit` if given (it must exist), otherwise the default
    /// path if that file exists, otherwise defaults. Environment overrides
    /// are applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/deploy-progress/deployd.toml` (or platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("deploy-progress").join("deployd.toml"))
    }

    /// Applies `DEPLOY_PROGRESS_SOCKET` if set.
    pub fn apply_env(&mut self) {
        if let Ok(path) = env::var(SOCKET_ENV_VAR) {
            if !path.trim().is_empty() {
                self.socket_path = PathBuf::from(path);
            }
        }
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join("deployd.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("deployd.log")
    }
}

/// Delivery policy for progress updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Attempts per update, including the first
    pub max_attempts: u32,

    /// Fixed wait before a retry, giving a dropped client time to reconnect
    pub reconnect_backoff_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            reconnect_backoff_ms: 500,
        }
    }
}

impl NotifierConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Pacing of the demo pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Pause between consecutive demo updates
    pub step_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { step_delay_ms: 300 }
    }
}

impl SimulationConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = DaemonConfig::from_toml_str("", Path::new("test.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.notifier.max_attempts, 2);
        assert_eq!(config.notifier.reconnect_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_override() {
        let text = r#"
            socket_path = "/run/deploy.sock"

            [notifier]
            reconnect_backoff_ms = 50
        "#;
        let config = DaemonConfig::from_toml_str(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/deploy.sock"));
        assert_eq!(config.notifier.max_attempts, 2);
        assert_eq!(config.notifier.reconnect_backoff_ms, 50);
        assert_eq!(config.reconnect_grace(), Duration::from_secs(30));
    }

    #[test]
    fn test_state_dir_locates_pid_and_log() {
        let config =
            DaemonConfig::from_toml_str(r#"state_dir = "/var/lib/deploy""#, Path::new("test.toml"))
                .unwrap();
        assert_eq!(config.pid_file(), PathBuf::from("/var/lib/deploy/deployd.pid"));
        assert_eq!(config.log_file(), PathBuf::from("/var/lib/deploy/deployd.log"));
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = DaemonConfig::from_toml_str("notifier = 3", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
