//! One-line terminal rendering of watch events.
//!
//! ```text
//! 14:02:11 ..  Clone repository          Cloning repository...
//! 14:02:11 ..  Clone repository          Clone repository (33%) [33%]
//! 14:02:12 ok  Clone repository          Clone repository complete (duration=1.2s, files=128)
//! ```

use deploy_core::StageStatus;
use deploy_protocol::{Details, ProgressEvent};
use serde_json::Value;

use crate::client::WatchEvent;

const LABEL_WIDTH: usize = 24;

/// Formats one event as a single line without a trailing newline.
pub fn format_event(event: &WatchEvent) -> String {
    match event {
        WatchEvent::Connected {
            client_id,
            session_id,
        } => format!("connected as session {session_id} ({client_id})"),
        WatchEvent::Disconnected => "disconnected from daemon, reconnecting".to_string(),
        WatchEvent::Progress(progress) => format_progress(progress),
    }
}

fn format_progress(event: &ProgressEvent) -> String {
    let mut line = format!(
        "{} {:<3} {:<width$} {}",
        event.timestamp.format("%H:%M:%S"),
        status_marker(event.status),
        event.stage.label(),
        event.message,
        width = LABEL_WIDTH,
    );

    if let Some(percent) = event.progress {
        line.push_str(&format!(" [{percent}%]"));
    }

    if !event.details.is_empty() {
        line.push_str(&format!(" ({})", format_details(&event.details)));
    }

    line
}

fn status_marker(status: StageStatus) -> &'static str {
    match status {
        StageStatus::InProgress => "..",
        StageStatus::Success => "ok",
        StageStatus::Error => "!!",
    }
}

/// `key=value` pairs in key order; strings are shown unquoted.
fn format_details(details: &Details) -> String {
    details
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use deploy_core::{DeploymentId, SessionId, Stage};
    use serde_json::json;

    fn event(stage: Stage, status: StageStatus, message: &str) -> ProgressEvent {
        let mut event = ProgressEvent::new(DeploymentId::new("dep-1"), stage, status, message);
        event.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 14, 2, 11).unwrap();
        event
    }

    #[test]
    fn test_format_connected() {
        let line = format_event(&WatchEvent::Connected {
            client_id: "client-3".to_string(),
            session_id: SessionId::new("sess-9"),
        });
        assert_eq!(line, "connected as session sess-9 (client-3)");
    }

    #[test]
    fn test_format_disconnected() {
        assert!(format_event(&WatchEvent::Disconnected).contains("disconnected"));
    }

    #[test]
    fn test_format_in_progress_without_extras() {
        let line = format_event(&WatchEvent::Progress(event(
            Stage::RepoClone,
            StageStatus::InProgress,
            "Cloning repository...",
        )));
        assert!(line.starts_with("14:02:11 .."));
        assert!(line.contains("Clone repository"));
        assert!(line.ends_with("Cloning repository..."));
        assert!(!line.contains('['));
        assert!(!line.contains('('));
    }

    #[test]
    fn test_format_progress_percent() {
        let progress = event(Stage::ContainerBuild, StageStatus::InProgress, "Building")
            .with_progress(Some(66));
        let line = format_event(&WatchEvent::Progress(progress));
        assert!(line.ends_with("Building [66%]"));
    }

    #[test]
    fn test_format_success_with_details() {
        let mut details = Details::new();
        details.insert("duration".to_string(), json!("1.2s"));
        details.insert("files".to_string(), json!(128));
        let done = event(Stage::RepoClone, StageStatus::Success, "Cloned")
            .with_details(Some(details));

        let line = format_event(&WatchEvent::Progress(done));
        assert!(line.contains(" ok "));
        assert!(line.ends_with("Cloned (duration=1.2s, files=128)"));
    }

    #[test]
    fn test_format_error_marker() {
        let line = format_event(&WatchEvent::Progress(event(
            Stage::SecurityScan,
            StageStatus::Error,
            "Scan failed",
        )));
        assert!(line.contains(" !! "));
    }

    #[test]
    fn test_format_custom_stage_uses_name() {
        let line = format_event(&WatchEvent::Progress(event(
            Stage::from_name("smoke_tests"),
            StageStatus::InProgress,
            "Running",
        )));
        assert!(line.contains("smoke_tests"));
    }
}
