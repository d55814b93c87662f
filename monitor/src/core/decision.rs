//! Decision engine: maps a task snapshot to exactly one action.
//!
//! Cases are evaluated in order and the first match wins. The stop-suppression
//! check is only invoked on branches that would (re)launch a task, so an expired
//! marker is consumed lazily and only when it matters.

use crate::core::types::{MonitorAction, MonitorDecision, RunStatus, TaskSnapshot};

pub const SUPPRESSED_REASON: &str = "skip restart: stop-requested within window";

/// Decide what to do with a task.
///
/// `is_suppressed` reports whether a user stop is still in effect for the task.
/// It is never consulted for done, actively running, stale, or completed tasks.
pub fn decide<F: FnOnce() -> bool>(snapshot: &TaskSnapshot, is_suppressed: F) -> MonitorDecision {
    if snapshot.done {
        return MonitorDecision::new(MonitorAction::Skip, "already done");
    }

    match &snapshot.status {
        // A hung-but-alive process is recovered even under a stop request: recovery
        // is not a user-visible restart.
        RunStatus::Running if snapshot.pid_alive && snapshot.is_stale => {
            let detail = snapshot
                .activity
                .as_ref()
                .map(|signal| signal.drift_reason.as_str())
                .unwrap_or("output inactive beyond stale threshold");
            MonitorDecision::new(
                MonitorAction::Recover,
                format!("running but stale: {detail}"),
            )
        }
        RunStatus::Running if snapshot.pid_alive => {
            MonitorDecision::new(MonitorAction::Skip, "actively running")
        }
        RunStatus::Running => relaunch(
            is_suppressed,
            MonitorAction::Resume,
            "marked running but process is dead",
        ),
        RunStatus::Completed => {
            if snapshot.output_nonempty {
                MonitorDecision::new(MonitorAction::Finalize, "completed with non-empty output")
            } else {
                MonitorDecision::new(
                    MonitorAction::Skip,
                    "completed (output empty, not finalizing)",
                )
            }
        }
        RunStatus::Failed => relaunch(is_suppressed, MonitorAction::Resume, "latest run failed"),
        _ if !snapshot.exists || !snapshot.has_runs => {
            relaunch(is_suppressed, MonitorAction::Start, "task has no runs yet")
        }
        other => relaunch(
            is_suppressed,
            MonitorAction::Start,
            format!("unexpected status {:?}", other.as_str()),
        ),
    }
}

fn relaunch<F: FnOnce() -> bool>(
    is_suppressed: F,
    action: MonitorAction,
    reason: impl Into<String>,
) -> MonitorDecision {
    if is_suppressed() {
        return MonitorDecision::new(MonitorAction::Skip, SUPPRESSED_REASON);
    }
    MonitorDecision::new(action, reason)
}
