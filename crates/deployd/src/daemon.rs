//! Process bookkeeping for a backgrounded daemon.
//!
//! The PID file lives in the configured `state_dir`, so `deployd stop` and
//! `deployd status` find the same daemon `deployd start` wrote, including
//! when several daemons run with different configs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use thiserror::Error;
use tracing::debug;

/// Errors managing the daemon process.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("PID {pid} does not fit a platform process id")]
    PidOutOfRange { pid: u32 },

    #[error("Failed to signal process {pid}: {error}")]
    Signal { pid: u32, error: String },

    #[error("PID file {path}: {error}")]
    PidFile { path: PathBuf, error: String },
}

/// PID file of a running daemon.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded PID. A missing or unparsable file reads as `None`.
    pub fn read(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.trim().parse().ok()
    }

    /// The recorded PID if that process is still alive. A stale file is
    /// removed.
    pub fn running_pid(&self) -> Option<u32> {
        let pid = self.read()?;
        if process_alive(pid) {
            return Some(pid);
        }
        debug!(pid, path = %self.path.display(), "Removing stale PID file");
        self.remove();
        None
    }

    /// Records the current process, creating the state directory if needed.
    pub fn write_current(&self) -> Result<(), DaemonError> {
        let pid_file_error = |e: io::Error| DaemonError::PidFile {
            path: self.path.clone(),
            error: e.to_string(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(pid_file_error)?;
        }
        fs::write(&self.path, process::id().to_string()).map_err(pid_file_error)
    }

    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %e, "Failed to remove PID file");
            }
        }
    }
}

fn to_pid_t(pid: u32) -> Result<libc::pid_t, DaemonError> {
    libc::pid_t::try_from(pid).map_err(|_| DaemonError::PidOutOfRange { pid })
}

/// Whether `pid` names a live process. Signal 0 checks existence and
/// permission without delivering anything.
pub fn process_alive(pid: u32) -> bool {
    // 0 would address our own process group.
    if pid == 0 {
        return false;
    }
    let Ok(pid_t) = to_pid_t(pid) else {
        return false;
    };
    // SAFETY: kill with signal 0 has no effect beyond the existence check.
    if unsafe { libc::kill(pid_t, 0) } == 0 {
        return true;
    }
    // Exists but owned by another user.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Sends SIGTERM to `pid`.
pub fn send_terminate(pid: u32) -> Result<(), DaemonError> {
    if pid == 0 {
        return Err(DaemonError::PidOutOfRange { pid });
    }
    let pid_t = to_pid_t(pid)?;
    // SAFETY: plain signal delivery to a positive pid.
    if unsafe { libc::kill(pid_t, libc::SIGTERM) } != 0 {
        return Err(DaemonError::Signal {
            pid,
            error: io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}
