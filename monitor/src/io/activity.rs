//! Progress evidence for a running task: message log plus output artifacts.
//!
//! Nothing here fails. Read errors are folded into the drift reason so a broken
//! log never aborts a poll.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::activity::{DriftInputs, compact_body_preview, evaluate_drift, is_meaningful_type};
use crate::core::types::{ActivitySignal, MessagePreview};
use crate::io::layout::{TaskPaths, resolve_run_path};
use crate::io::message_bus::{BusMessage, read_messages};
use crate::io::run_info::RunInfo;

/// Conventional artifact names inside a run directory.
pub const FALLBACK_OUTPUT_FILES: [&str; 3] = ["output.md", "agent-stdout.txt", "agent-stderr.txt"];

#[derive(Debug, Clone, Copy)]
pub struct ActivitySettings {
    /// Silence longer than this is drift.
    pub threshold: Duration,
    pub preview_chars: usize,
}

/// Gather the activity signal for `run_id` of `task`.
pub fn collect_activity_signals(
    task: &TaskPaths,
    run_id: &str,
    run: &RunInfo,
    settings: &ActivitySettings,
    now: DateTime<Utc>,
) -> ActivitySignal {
    let (messages, read_error) = match read_messages(&task.message_bus_path) {
        Ok(messages) => (messages, None),
        Err(err) => {
            debug!(task_id = %task.task_id, err = %err, "message bus unreadable");
            (Vec::new(), Some(format!("{err:#}")))
        }
    };

    let latest_message = messages.last().map(|msg| MessagePreview {
        timestamp: msg.timestamp,
        kind: msg.kind.clone(),
        body_preview: compact_body_preview(&msg.body, settings.preview_chars),
    });
    let last_meaningful_at = last_meaningful_at(&messages);

    let run_dir = task.run_dir(run_id);
    let latest_output_activity_at = candidate_output_paths(&run_dir, run)
        .iter()
        .filter_map(|path| modified_at(path))
        .max();

    let status = run.status();
    let (drift_risk, drift_reason) = evaluate_drift(&DriftInputs {
        status: &status,
        last_meaningful_at,
        run_started_at: run.start_time,
        threshold: settings.threshold,
        now,
        read_error: read_error.as_deref(),
    });

    ActivitySignal {
        latest_message,
        last_meaningful_at,
        latest_output_activity_at,
        drift_risk,
        drift_reason,
    }
}

/// Newest meaningful message with a timestamp, scanning from the end.
fn last_meaningful_at(messages: &[BusMessage]) -> Option<DateTime<Utc>> {
    messages
        .iter()
        .rev()
        .filter(|msg| is_meaningful_type(&msg.kind))
        .find_map(|msg| msg.timestamp)
}

/// Recorded artifact paths followed by the conventional ones, deduplicated
/// after normalization.
pub fn candidate_output_paths(run_dir: &Path, run: &RunInfo) -> Vec<PathBuf> {
    let recorded = [&run.output_path, &run.stdout_path, &run.stderr_path]
        .into_iter()
        .filter_map(|raw| resolve_run_path(raw, run_dir));
    let fallback = FALLBACK_OUTPUT_FILES.iter().map(|name| run_dir.join(name));

    let mut paths: Vec<PathBuf> = Vec::new();
    for path in recorded.chain(fallback) {
        let cleaned: PathBuf = path.components().collect();
        if !paths.contains(&cleaned) {
            paths.push(cleaned);
        }
    }
    paths
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let meta = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return None,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), err = %err, "cannot stat output artifact");
            }
            return None;
        }
    };
    match meta.modified() {
        Ok(time) => Some(DateTime::<Utc>::from(time)),
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), err = %err, "cannot stat output artifact");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::io::layout::ScopePaths;

    fn t(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0)
            .single()
            .expect("valid time")
    }

    fn settings() -> ActivitySettings {
        ActivitySettings {
            threshold: Duration::from_secs(20 * 60),
            preview_chars: 16,
        }
    }

    fn running_since(start: DateTime<Utc>) -> RunInfo {
        RunInfo {
            run_id: "r1".to_string(),
            status: "running".to_string(),
            pid: 10,
            start_time: Some(start),
            ..RunInfo::default()
        }
    }

    #[test]
    fn meaningful_signal_drives_drift() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = ScopePaths::new(temp.path(), "p").task("t");
        fs::create_dir_all(task.run_dir("r1")).expect("mkdir");
        fs::write(
            &task.message_bus_path,
            "\
---
ts: 2026-03-01T12:05:00Z
type: FACT
---
found   the
bug
---
ts: 2026-03-01T12:30:00Z
type: INFO
---
still looking around the codebase
",
        )
        .expect("write bus");

        let signal =
            collect_activity_signals(&task, "r1", &running_since(t(12, 0)), &settings(), t(12, 40));
        assert_eq!(signal.last_meaningful_at, Some(t(12, 5)));
        assert!(signal.drift_risk);
        assert_eq!(signal.drift_reason, "no meaningful bus signal for 35m0s");

        let latest = signal.latest_message.expect("latest message");
        assert_eq!(latest.kind, "INFO");
        assert_eq!(latest.body_preview, "still looking...");
    }

    #[test]
    fn missing_log_falls_back_to_start_time() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = ScopePaths::new(temp.path(), "p").task("t");

        let signal =
            collect_activity_signals(&task, "r1", &running_since(t(12, 0)), &settings(), t(12, 10));
        assert!(signal.latest_message.is_none());
        assert!(!signal.drift_risk);
        assert_eq!(
            signal.drift_reason,
            "no meaningful bus signal yet (running for 10m0s)"
        );
    }

    #[test]
    fn unreadable_log_is_reported_in_reason() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = ScopePaths::new(temp.path(), "p").task("t");
        fs::create_dir_all(&task.message_bus_path).expect("directory in place of log");

        let signal =
            collect_activity_signals(&task, "r1", &running_since(t(12, 0)), &settings(), t(13, 0));
        assert!(signal.drift_risk);
        assert!(signal.drift_reason.contains("message bus read failed"));
    }

    #[test]
    fn output_activity_uses_newest_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = ScopePaths::new(temp.path(), "p").task("t");
        fs::create_dir_all(task.run_dir("r1")).expect("mkdir");
        fs::write(task.run_dir("r1").join("agent-stdout.txt"), "log").expect("write");

        let signal =
            collect_activity_signals(&task, "r1", &running_since(t(12, 0)), &settings(), t(12, 1));
        assert!(signal.latest_output_activity_at.is_some());
    }

    #[test]
    fn directories_are_not_output_activity() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task = ScopePaths::new(temp.path(), "p").task("t");
        fs::create_dir_all(task.run_dir("r1").join("output.md")).expect("mkdir");

        let signal =
            collect_activity_signals(&task, "r1", &running_since(t(12, 0)), &settings(), t(12, 1));
        assert_eq!(signal.latest_output_activity_at, None);
    }

    #[test]
    fn candidate_paths_are_deduplicated() {
        let run = RunInfo {
            output_path: "./output.md".to_string(),
            stdout_path: "/abs/stdout.log".to_string(),
            ..RunInfo::default()
        };
        let paths = candidate_output_paths(Path::new("/runs/r1"), &run);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/runs/r1/output.md"),
                PathBuf::from("/abs/stdout.log"),
                PathBuf::from("/runs/r1/agent-stdout.txt"),
                PathBuf::from("/runs/r1/agent-stderr.txt"),
            ]
        );
    }
}
