//! Demo pipeline that drives a `Notifier` through the standard stages.
//!
//! No work is performed: each stage just reports start, two progress
//! steps and completion, pausing `step_delay` between updates. It exists
//! so a client can watch the full event stream (and so the delivery path
//! can be exercised end to end) without a real build system.

use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tracing::info;

use deploy_core::Stage;
use deploy_protocol::Details;

use crate::notifier::Notifier;

/// What the demo does.
#[derive(Debug, Clone, Default)]
pub struct SimulationPlan {
    /// Pause between consecutive updates
    pub step_delay: Duration,

    /// Stage that reports an error instead of completing
    pub fail_at: Option<Stage>,
}

/// How the demo ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationResult {
    Succeeded,
    FailedAt(Stage),
}

fn start_message(stage: &Stage) -> &'static str {
    match stage {
        Stage::RepoClone => "Cloning repository...",
        Stage::CodeAnalysis => "Analyzing project structure...",
        Stage::DockerfileGeneration => "Generating Dockerfile...",
        Stage::SecurityScan => "Scanning for vulnerabilities...",
        Stage::ContainerBuild => "Building container image...",
        Stage::CloudDeployment => "Deploying to cloud...",
        Stage::Other(_) => "Working...",
    }
}

fn sample_details(stage: &Stage) -> Details {
    let value = match stage {
        Stage::RepoClone => json!({ "files": 128 }),
        Stage::CodeAnalysis => json!({ "language": "python", "framework": "fastapi" }),
        Stage::DockerfileGeneration => json!({ "base_image": "python:3.12-slim" }),
        Stage::SecurityScan => json!({ "issues": 0 }),
        Stage::ContainerBuild => json!({ "image": "app:latest" }),
        Stage::CloudDeployment => json!({ "url": "https://app.example.com" }),
        Stage::Other(_) => json!({}),
    };

    match value {
        serde_json::Value::Object(map) => map,
        _ => Details::new(),
    }
}

/// Runs the six standard stages against `notifier`.
pub async fn simulate(notifier: &mut Notifier, plan: &SimulationPlan) -> SimulationResult {
    info!(
        deployment_id = %notifier.deployment_id(),
        session_id = %notifier.session_id(),
        "Starting simulated deployment"
    );

    for stage in Stage::STANDARD {
        notifier
            .start_stage(stage.clone(), start_message(&stage))
            .await;

        for percent in [33u8, 66] {
            sleep(plan.step_delay).await;
            notifier
                .update_progress(
                    stage.clone(),
                    format!("{} ({percent}%)", stage.label()),
                    percent,
                )
                .await;
        }

        sleep(plan.step_delay).await;

        if plan.fail_at.as_ref() == Some(&stage) {
            let mut details = Details::new();
            details.insert("simulated".to_string(), json!(true));
            notifier
                .fail_stage(
                    stage.clone(),
                    format!("{} failed", stage.label()),
                    Some(details),
                )
                .await;
            info!(stage = %stage, "Simulated deployment failed");
            return SimulationResult::FailedAt(stage);
        }

        notifier
            .complete_stage(
                stage.clone(),
                format!("{} complete", stage.label()),
                Some(sample_details(&stage)),
            )
            .await;
    }

    info!(deployment_id = %notifier.deployment_id(), "Simulated deployment finished");
    SimulationResult::Succeeded
}
