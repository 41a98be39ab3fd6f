//! deployd - deployment progress daemon
//!
//! Accepts watch clients on a Unix socket, keeps their sessions registered
//! across reconnects, and delivers progress events to them.
//!
//! Every subcommand resolves the same configuration, so `stop` and `status`
//! find the PID file and socket of the daemon that `start` launched with it.
//!
//! ```bash
//! deployd start                          # foreground
//! deployd start -d --config ./deployd.toml
//! deployd status --config ./deployd.toml
//! deployd stop --config ./deployd.toml
//! ```

use std::fs::{self, File};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use daemonize::Daemonize;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use deployd::config::DaemonConfig;
use deployd::daemon::{process_alive, send_terminate, PidFile};
use deployd::registry::ConnectionRegistry;
use deployd::server::DeploymentServer;

const STOP_POLL: Duration = Duration::from_millis(100);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Deployment progress daemon
#[derive(Parser, Debug)]
#[command(name = "deployd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(ClapArgs, Debug, Default)]
struct ConfigArg {
    /// Config file (defaults to $XDG_CONFIG_HOME/deploy-progress/deployd.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl ConfigArg {
    fn resolve(&self) -> Result<DaemonConfig> {
        DaemonConfig::resolve(self.config.as_deref())
            .context("Failed to load daemon configuration")
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Fork to the background, logging to <state_dir>/deployd.log
        #[arg(short = 'd', long)]
        daemon: bool,

        #[command(flatten)]
        config: ConfigArg,
    },
    /// Stop the daemon started with the same config
    Stop {
        #[command(flatten)]
        config: ConfigArg,
    },
    /// Show the resolved configuration and whether the daemon is serving
    Status {
        #[command(flatten)]
        config: ConfigArg,
    },
}

fn main() -> Result<()> {
    let command = Args::parse().command.unwrap_or(Command::Start {
        daemon: false,
        config: ConfigArg::default(),
    });

    match command {
        Command::Start { daemon, config } => start(config.resolve()?, daemon),
        Command::Stop { config } => stop(&config.resolve()?),
        Command::Status { config } => status(&config.resolve()?),
    }
}

fn start(config: DaemonConfig, daemon: bool) -> Result<()> {
    let pid_file = PidFile::new(config.pid_file());
    if let Some(pid) = pid_file.running_pid() {
        bail!(
            "deployd is already running (PID {pid}, {}); stop it first",
            pid_file.path().display()
        );
    }

    if daemon {
        // Forked before any runtime exists; the child gets its own.
        fs::create_dir_all(&config.state_dir).with_context(|| {
            format!("Failed to create state directory {}", config.state_dir.display())
        })?;
        let log = File::create(config.log_file()).context("Failed to create log file")?;
        let log_err = log.try_clone().context("Failed to duplicate log file handle")?;
        Daemonize::new()
            .working_directory("/")
            .stdout(log)
            .stderr(log_err)
            .start()
            .context("Failed to daemonize")?;
    }

    pid_file.write_current()?;
    let result = run_daemon(config);
    pid_file.remove();
    result
}

fn stop(config: &DaemonConfig) -> Result<()> {
    let pid_file = PidFile::new(config.pid_file());
    let Some(pid) = pid_file.running_pid() else {
        println!("deployd is not running ({})", pid_file.path().display());
        return Ok(());
    };

    println!("Stopping deployd (PID {pid})...");
    send_terminate(pid)?;

    let mut waited = Duration::ZERO;
    while waited < STOP_TIMEOUT {
        if !process_alive(pid) {
            println!("deployd stopped.");
            return Ok(());
        }
        thread::sleep(STOP_POLL);
        waited += STOP_POLL;
    }
    bail!("deployd (PID {pid}) did not stop within {}s", STOP_TIMEOUT.as_secs())
}

fn status(config: &DaemonConfig) -> Result<()> {
    let pid = PidFile::new(config.pid_file()).running_pid();
    let accepting = UnixStream::connect(&config.socket_path).is_ok();

    match pid {
        Some(pid) => println!("deployd:            running (PID {pid})"),
        None => println!("deployd:            not running"),
    }
    println!(
        "socket:             {} ({})",
        config.socket_path.display(),
        if accepting { "accepting" } else { "unreachable" }
    );
    println!("state dir:          {}", config.state_dir.display());
    println!("reconnect grace:    {}s", config.reconnect_grace_secs);
    println!(
        "delivery:           {} attempts, {}ms backoff",
        config.notifier.max_attempts, config.notifier.reconnect_backoff_ms
    );
    println!("demo step delay:    {}ms", config.simulation.step_delay_ms);

    if pid.is_none() && !accepting {
        process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deployd=info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        socket = %config.socket_path.display(),
        state_dir = %config.state_dir.display(),
        reconnect_grace_secs = config.reconnect_grace_secs,
        max_attempts = config.notifier.max_attempts,
        "deployd starting"
    );

    let cancel_token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        shutdown.cancel();
    });

    let server = DeploymentServer::new(config, ConnectionRegistry::new(), cancel_token);
    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("deployd stopped");
    Ok(())
}
