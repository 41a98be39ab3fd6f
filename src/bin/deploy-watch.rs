//! deploy-watch - follow deployment progress from the daemon
//!
//! Connects to `deployd` as a session and prints one line per progress
//! event. Logs go to stderr so stdout carries only rendered events.
//!
//! # Usage
//!
//! ```text
//! deploy-watch --session build-42                 # watch a session
//! deploy-watch --simulate --exit-on-finish        # run the demo pipeline
//! deploy-watch --simulate --fail-at security_scan # demo a failing stage
//! ```

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use deploy_core::{DeploymentId, SessionId, Stage};
use deploy_watch::render::format_event;
use deploy_watch::{SimulateRequest, WatchClient, WatchConfig, WatchEvent};
use deployd::config::SOCKET_ENV_VAR;
use deployd::server::DEFAULT_SOCKET_PATH;

/// Follow deployment progress reported by deployd
#[derive(Parser, Debug)]
#[command(name = "deploy-watch", version, about)]
struct Args {
    /// Daemon socket (defaults to $DEPLOY_PROGRESS_SOCKET or /tmp/deploy-progress.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Session to subscribe as (defaults to one derived from the process id)
    #[arg(long)]
    session: Option<String>,

    /// Ask the daemon to run the demo pipeline for this session
    #[arg(long)]
    simulate: bool,

    /// Deployment id for the demo run
    #[arg(long, requires = "simulate")]
    deployment_id: Option<String>,

    /// Stage at which the demo run fails (e.g. security_scan)
    #[arg(long, requires = "simulate")]
    fail_at: Option<String>,

    /// Exit after the deployment succeeds or any stage fails
    #[arg(long)]
    exit_on_finish: bool,
}

fn socket_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.socket {
        return path.clone();
    }
    match env::var(SOCKET_ENV_VAR) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_SOCKET_PATH),
    }
}

fn session_id(args: &Args) -> Result<SessionId> {
    match &args.session {
        Some(raw) => SessionId::parse(raw).context("Invalid --session"),
        None => Ok(SessionId::new(format!("watch-{}", process::id()))),
    }
}

fn simulate_request(args: &Args) -> Result<Option<SimulateRequest>> {
    if !args.simulate {
        return Ok(None);
    }

    let deployment_id = args
        .deployment_id
        .as_deref()
        .map(DeploymentId::parse)
        .transpose()
        .context("Invalid --deployment-id")?;

    Ok(Some(SimulateRequest {
        deployment_id,
        fail_at: args.fail_at.as_deref().map(Stage::from_name),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("deploy_watch=warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = WatchConfig::new(socket_path(&args), session_id(&args)?);
    let simulate = simulate_request(&args)?;

    info!(
        socket = %config.socket_path.display(),
        session_id = %config.session_id,
        simulate = simulate.is_some(),
        "deploy-watch starting"
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WatchEvent>();
    let cancel_token = CancellationToken::new();

    let mut client = WatchClient::new(config, event_tx, cancel_token.clone());
    if let Some(request) = simulate {
        client = client.with_simulation(request);
    }
    let client_handle = tokio::spawn(async move {
        client.run().await;
    });

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    debug!("Event channel closed");
                    break;
                };
                println!("{}", format_event(&event));
                if args.exit_on_finish && event.is_final() {
                    info!("Deployment finished");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
        }
    }

    cancel_token.cancel();
    let _ = tokio::time::timeout(Duration::from_millis(100), client_handle).await;

    Ok(())
}
