//! Shared deterministic types for monitor core logic.
//!
//! These types define stable contracts between the assessor, the decision
//! engine, and the pass orchestration. They carry no I/O handles and are
//! rebuilt on every poll.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recorded status of the most recent run of a task.
///
/// `None` means no run record was found; `Unknown` means a record exists but
/// could not be read. Any unrecognized value is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    None,
    Unknown,
    Running,
    Completed,
    Failed,
    Other(String),
}

impl RunStatus {
    /// Parse a persisted status string (case-insensitive, whitespace-trimmed).
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "unknown" => RunStatus::Unknown,
            "" | "-" => RunStatus::None,
            _ => RunStatus::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::None => "-",
            RunStatus::Unknown => "unknown",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action chosen for a task on one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorAction {
    Skip,
    Start,
    Resume,
    Recover,
    Finalize,
}

impl MonitorAction {
    pub fn as_str(self) -> &'static str {
        match self {
            MonitorAction::Skip => "skip",
            MonitorAction::Start => "start",
            MonitorAction::Resume => "resume",
            MonitorAction::Recover => "recover",
            MonitorAction::Finalize => "finalize",
        }
    }

    /// Actions that hand work to the launcher.
    pub fn launches(self) -> bool {
        matches!(
            self,
            MonitorAction::Start | MonitorAction::Resume | MonitorAction::Recover
        )
    }
}

impl fmt::Display for MonitorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the decision engine: one action plus the reason shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorDecision {
    pub action: MonitorAction,
    pub reason: String,
}

impl MonitorDecision {
    pub fn new(action: MonitorAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

/// Point-in-time view of one task, assembled from on-disk evidence.
///
/// `is_stale` is only ever set when `status == Running` and `pid_alive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub task_id: String,
    /// Task directory is present.
    pub exists: bool,
    /// At least one run directory is present.
    pub has_runs: bool,
    pub status: RunStatus,
    /// `DONE` marker is present.
    pub done: bool,
    pub pid_alive: bool,
    pub is_stale: bool,
    pub latest_run_id: Option<String>,
    /// The latest run's output artifact has non-whitespace content.
    pub output_nonempty: bool,
    /// Drift verdict for running tasks, when it was computed.
    pub activity: Option<ActivitySignal>,
}

impl TaskSnapshot {
    /// Snapshot for a task with no directory on disk.
    pub fn absent(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            exists: false,
            has_runs: false,
            status: RunStatus::None,
            done: false,
            pid_alive: false,
            is_stale: false,
            latest_run_id: None,
            output_nonempty: false,
            activity: None,
        }
    }
}

/// Newest message-log entry, compacted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePreview {
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: String,
    pub body_preview: String,
}

/// Progress evidence gathered for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivitySignal {
    pub latest_message: Option<MessagePreview>,
    pub last_meaningful_at: Option<DateTime<Utc>>,
    pub latest_output_activity_at: Option<DateTime<Utc>>,
    pub drift_risk: bool,
    pub drift_reason: String,
}
