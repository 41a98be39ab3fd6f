//! The `deployment_progress` event.

use chrono::{DateTime, Utc};
use deploy_core::{DeploymentId, Stage, StageStatus};
use serde::{Deserialize, Serialize};

/// Free-form structured details attached to an event.
pub type Details = serde_json::Map<String, serde_json::Value>;

/// One progress report for a deployment stage.
///
/// Built at send time and discarded after the delivery attempt. On the
/// wire it is the body of `ServerMessage::DeploymentProgress`, so the
/// serialized form gains `"type": "deployment_progress"`.
///
/// `details` is omitted when empty and `progress` when absent; neither is
/// ever serialized as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub deployment_id: DeploymentId,

    pub stage: Stage,

    pub status: StageStatus,

    /// Human-readable message
    pub message: String,

    /// RFC 3339 timestamp generated when the event is built
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Details::is_empty")]
    pub details: Details,

    /// Percentage within the stage (0-100 by convention, not enforced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl ProgressEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        deployment_id: DeploymentId,
        stage: Stage,
        status: StageStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            deployment_id,
            stage,
            status,
            message: message.into(),
            timestamp: Utc::now(),
            details: Details::new(),
            progress: None,
        }
    }

    /// Attaches details, replacing any already present.
    #[must_use]
    pub fn with_details(mut self, details: Option<Details>) -> Self {
        self.details = details.unwrap_or_default();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<u8>) -> Self {
        self.progress = progress;
        self
    }

    /// Returns a detail value rendered as a string, if present.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ProgressEvent {
        ProgressEvent::new(
            DeploymentId::new("dep-1"),
            Stage::ContainerBuild,
            StageStatus::InProgress,
            "Building...",
        )
    }

    #[test]
    fn test_optional_fields_omitted() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("details").is_none());
        assert!(value.get("progress").is_none());
        assert_eq!(value["status"], "in-progress");
        assert_eq!(value["stage"], "container_build");
    }

    #[test]
    fn test_empty_details_are_omitted() {
        let event = sample().with_details(Some(Details::new()));
        let value = serde_json::to_value(event).unwrap();
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_details_and_progress_present() {
        let mut details = Details::new();
        details.insert("image".to_string(), json!("app:latest"));

        let event = sample().with_details(Some(details)).with_progress(Some(42));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["progress"], 42);
        assert_eq!(value["details"]["image"], "app:latest");
        assert_eq!(event.detail_str("image"), Some("app:latest"));
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let value = serde_json::to_value(sample()).unwrap();
        let raw = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(raw).is_ok());
    }
}
