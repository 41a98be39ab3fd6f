//! Best-effort progress notifier for one deployment.
//!
//! The `Notifier` turns stage transitions into `deployment_progress`
//! messages and pushes them to whatever connection is currently registered
//! for its session.
//!
//! # Delivery policy
//!
//! Each update gets up to `max_attempts` attempts (2 by default). Every
//! attempt re-resolves the connection, because a reconnect may have
//! replaced it since the previous one:
//!
//! - no connection: dropped at once, nothing is sent
//! - connection reports a state other than `Connected`: wait the fixed
//!   backoff, then retry; dropped after the last attempt
//! - send fails with a closed-channel error: same wait-and-retry
//! - send fails any other way: dropped at once
//!
//! # Error Contract
//!
//! Progress reporting is diagnostic. No public operation here returns an
//! error: every failure is logged and the update is dropped, so a flaky
//! client can never stall or fail the pipeline that reports to it.
//! `send_update` returns a `DeliveryOutcome` for callers (and tests) that
//! want to know what happened, but ignoring it is always fine.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use deploy_core::{DeploymentId, SessionId, Stage, StageStatus};
use deploy_protocol::{Details, ProgressEvent, ServerMessage};

use crate::config::NotifierConfig;
use crate::connection::{ConnectionState, SendError};
use crate::registry::ConnectionRegistry;
use crate::resolver::ConnectionResolver;

/// Detail key under which `complete_stage` reports elapsed time.
pub const DURATION_KEY: &str = "duration";

/// Why an update was dropped.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("No active connection for session")]
    NoConnection,

    #[error("Connection not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("Connection closed during send after {attempts} attempts")]
    ClosedDuringSend { attempts: u32 },

    #[error("Send failed: {0}")]
    SendFailed(SendError),

    #[error("Failed to encode event: {0}")]
    Serialize(String),
}

/// Result of a single `send_update` call.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Dropped(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Start time of the stage currently in progress.
#[derive(Debug, Clone)]
pub struct StageTimer {
    stage: Stage,
    started_at: Instant,
}

impl StageTimer {
    fn start(stage: Stage) -> Self {
        Self {
            stage,
            started_at: Instant::now(),
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Formats a stage duration the way the frontend displays it: `"1.2s"`.
pub fn format_duration(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}

/// Pushes progress for one deployment to one session.
///
/// Stage operations take `&mut self` because they update the stage timer;
/// callers that report from several tasks must serialize access themselves.
pub struct Notifier {
    session_id: SessionId,
    deployment_id: DeploymentId,
    resolver: Arc<dyn ConnectionResolver>,
    config: NotifierConfig,
    timer: Option<StageTimer>,
}

impl Notifier {
    /// Creates a notifier with the default delivery policy.
    pub fn new(
        session_id: SessionId,
        deployment_id: DeploymentId,
        resolver: Arc<dyn ConnectionResolver>,
    ) -> Self {
        Self {
            session_id,
            deployment_id,
            resolver,
            config: NotifierConfig::default(),
            timer: None,
        }
    }

    /// Creates a notifier that reads the live registry on every attempt.
    pub fn for_registry(
        session_id: SessionId,
        deployment_id: DeploymentId,
        registry: ConnectionRegistry,
    ) -> Self {
        Self::new(session_id, deployment_id, Arc::new(registry))
    }

    #[must_use]
    pub fn with_config(mut self, config: NotifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    /// The running stage timer, if a stage was started and not yet
    /// completed or failed.
    pub fn current_stage(&self) -> Option<&StageTimer> {
        self.timer.as_ref()
    }

    /// Builds an event and attempts best-effort delivery.
    ///
    /// Never fails; see the module docs for the retry policy.
    pub async fn send_update(
        &self,
        stage: impl Into<Stage>,
        status: StageStatus,
        message: impl Into<String>,
        details: Option<Details>,
        progress: Option<u8>,
    ) -> DeliveryOutcome {
        let stage = stage.into();
        let event = ProgressEvent::new(self.deployment_id.clone(), stage.clone(), status, message)
            .with_details(details)
            .with_progress(progress);

        let outcome = match serde_json::to_value(ServerMessage::progress(event)) {
            Ok(payload) => match self.deliver(&payload).await {
                Ok(attempts) => DeliveryOutcome::Delivered { attempts },
                Err(e) => DeliveryOutcome::Dropped(e),
            },
            Err(e) => DeliveryOutcome::Dropped(DeliveryError::Serialize(e.to_string())),
        };

        match &outcome {
            DeliveryOutcome::Delivered { attempts } => {
                debug!(
                    session_id = %self.session_id,
                    stage = %stage,
                    status = %status,
                    attempts,
                    "Progress update delivered"
                );
            }
            DeliveryOutcome::Dropped(
                e @ (DeliveryError::NoConnection
                | DeliveryError::NotReady { .. }
                | DeliveryError::ClosedDuringSend { .. }),
            ) => {
                warn!(
                    session_id = %self.session_id,
                    stage = %stage,
                    status = %status,
                    reason = %e,
                    "Skipping progress update, client may reconnect later"
                );
            }
            DeliveryOutcome::Dropped(e) => {
                error!(
                    session_id = %self.session_id,
                    stage = %stage,
                    status = %status,
                    error = %e,
                    "Progress update failed"
                );
            }
        }

        outcome
    }

    /// Runs the attempt loop. Returns the number of attempts on success.
    async fn deliver(&self, payload: &serde_json::Value) -> Result<u32, DeliveryError> {
        let max_attempts = self.config.max_attempts.max(1);
        let backoff = self.config.reconnect_backoff();
        let mut last_error = DeliveryError::NoConnection;
        // A handle that failed a write marks itself Disconnected, so the
        // next attempt sees "not ready"; the cause is still the closed send.
        let mut saw_closed = false;

        for attempt in 1..=max_attempts {
            let Some(connection) = self.resolver.resolve(&self.session_id).await else {
                return Err(DeliveryError::NoConnection);
            };

            match connection.state() {
                Some(ConnectionState::Connected) | None => {}
                Some(state) => {
                    debug!(
                        session_id = %self.session_id,
                        attempt,
                        max_attempts,
                        state = ?state,
                        "Connection not ready"
                    );
                    last_error = if saw_closed {
                        DeliveryError::ClosedDuringSend { attempts: attempt }
                    } else {
                        DeliveryError::NotReady { attempts: attempt }
                    };
                    if attempt < max_attempts {
                        sleep(backoff).await;
                    }
                    continue;
                }
            }

            match connection.send_json(payload).await {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_closed() => {
                    debug!(
                        session_id = %self.session_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Connection closed during send"
                    );
                    saw_closed = true;
                    last_error = DeliveryError::ClosedDuringSend { attempts: attempt };
                    if attempt < max_attempts {
                        sleep(backoff).await;
                    }
                }
                Err(e) => return Err(DeliveryError::SendFailed(e)),
            }
        }

        Err(last_error)
    }

    /// Starts timing `stage` and reports it in progress.
    pub async fn start_stage(&mut self, stage: impl Into<Stage>, message: impl Into<String>) {
        let stage = stage.into();
        self.timer = Some(StageTimer::start(stage.clone()));
        self.send_update(stage, StageStatus::InProgress, message, None, None)
            .await;
    }

    /// Reports `stage` as successful, adding the elapsed time under
    /// `"duration"` when a stage timer was running.
    pub async fn complete_stage(
        &mut self,
        stage: impl Into<Stage>,
        message: impl Into<String>,
        details: Option<Details>,
    ) {
        let stage = stage.into();
        let mut details = details.unwrap_or_default();

        if let Some(timer) = &self.timer {
            if timer.stage() != &stage {
                debug!(
                    started = %timer.stage(),
                    completed = %stage,
                    "Completing a different stage than the one started"
                );
            }
            details.insert(
                DURATION_KEY.to_string(),
                serde_json::Value::String(format_duration(timer.elapsed())),
            );
        }

        self.send_update(stage, StageStatus::Success, message, Some(details), None)
            .await;
        self.timer = None;
    }

    /// Reports `stage` as failed and clears the stage timer.
    pub async fn fail_stage(
        &mut self,
        stage: impl Into<Stage>,
        error_message: impl Into<String>,
        details: Option<Details>,
    ) {
        self.send_update(stage, StageStatus::Error, error_message, details, None)
            .await;
        self.timer = None;
    }

    /// Reports intermediate progress within a stage.
    pub async fn update_progress(
        &self,
        stage: impl Into<Stage>,
        message: impl Into<String>,
        progress: u8,
    ) {
        self.send_update(stage, StageStatus::InProgress, message, None, Some(progress))
            .await;
    }
}
