//! `monitor status`: read-only view of every pending task.
//!
//! Uses the same assessment and decision logic as a pass, but peeks at
//! stop-suppression markers instead of consuming them and never acts.

use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::activity::{format_age, safe_age};
use crate::core::decision::decide;
use crate::core::types::{ActivitySignal, MonitorDecision, TaskSnapshot};
use crate::io::activity::collect_activity_signals;
use crate::io::assess::assess_task;
use crate::io::layout::ScopePaths;
use crate::io::liveness::Liveness;
use crate::io::markers::MarkerStore;
use crate::io::run_info::load_run_info;
use crate::io::stop_request::StopRequests;
use crate::io::todo_file::load_todo_entries;
use crate::pass::PassSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusRow {
    pub snapshot: TaskSnapshot,
    /// What a pass would decide right now.
    pub decision: MonitorDecision,
}

/// Assess every unchecked checklist task without side effects.
pub fn collect_status<P: Liveness, S: MarkerStore>(
    scope: &ScopePaths,
    settings: &PassSettings,
    now: DateTime<Utc>,
    procs: &P,
    markers: &S,
) -> Result<Vec<TaskStatusRow>> {
    let entries = load_todo_entries(&settings.todo_path, &settings.task_id_pattern)?;
    let stops = StopRequests::new(markers);
    Ok(entries
        .iter()
        .map(|entry| {
            let mut snapshot = assess_task(
                scope,
                &entry.task_id,
                &settings.activity,
                now,
                procs,
                markers,
            );
            let decision = decide(&snapshot, || {
                stops.peek(&entry.task_id, settings.stop_window, now)
            });
            // Passes only gather activity for live running tasks; the report
            // shows it for every task with a readable latest run.
            if snapshot.activity.is_none() {
                snapshot.activity = latest_run_activity(scope, &snapshot, settings, now);
            }
            TaskStatusRow { snapshot, decision }
        })
        .collect())
}

/// Render rows as a table with detail lines under each task.
pub fn render_status(rows: &[TaskStatusRow], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        out.push_str("no pending tasks\n");
        return out;
    }
    let width = rows
        .iter()
        .map(|row| row.snapshot.task_id.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let _ = writeln!(
        out,
        "{:<width$}  {:<9}  {:<5}  {:<20}  {:<5}  {:<8}",
        "TASK", "STATUS", "ALIVE", "LATEST RUN", "DRIFT", "ACTION"
    );
    for row in rows {
        let snap = &row.snapshot;
        let status = if snap.done {
            "done".to_string()
        } else {
            snap.status.to_string()
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<9}  {:<5}  {:<20}  {:<5}  {:<8}",
            snap.task_id,
            status,
            yes_no(snap.pid_alive),
            snap.latest_run_id.as_deref().unwrap_or("-"),
            yes_no(snap.is_stale),
            row.decision.action.as_str(),
        );
        let _ = writeln!(out, "    reason: {}", row.decision.reason);
        let Some(activity) = &snap.activity else {
            continue;
        };
        let _ = writeln!(out, "    drift: {}", activity.drift_reason);
        let _ = writeln!(
            out,
            "    last signal: {}  output activity: {}",
            ago(activity.last_meaningful_at, now),
            ago(activity.latest_output_activity_at, now)
        );
        if let Some(msg) = &activity.latest_message {
            let _ = writeln!(
                out,
                "    latest message: [{}] {} {}",
                msg.kind,
                ago(msg.timestamp, now),
                msg.body_preview
            );
        }
    }
    out
}

fn latest_run_activity(
    scope: &ScopePaths,
    snapshot: &TaskSnapshot,
    settings: &PassSettings,
    now: DateTime<Utc>,
) -> Option<ActivitySignal> {
    let run_id = snapshot.latest_run_id.as_deref()?;
    let task = scope.task(&snapshot.task_id);
    match load_run_info(&task.run_info_path(run_id)) {
        Ok(info) => Some(collect_activity_signals(
            &task,
            run_id,
            &info,
            &settings.activity,
            now,
        )),
        Err(err) => {
            debug!(
                task_id = %snapshot.task_id,
                run_id,
                err = %format!("{err:#}"),
                "no activity for unreadable run"
            );
            None
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn ago(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => format!("{} ago", format_age(safe_age(now, at))),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::core::types::MonitorAction;
    use crate::io::config::MonitorConfig;
    use crate::io::markers::{FsMarkerStore, Marker};
    use crate::test_support::{FakeProcesses, TaskFixture};

    const RUNNING: &str = "task-20260301-100000-busy-task";
    const STOPPED: &str = "task-20260301-100100-stopped-task";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn status_is_read_only() {
        let fixture = TaskFixture::new("p");
        fixture.write_todo(&format!("- [ ] {RUNNING}\n- [ ] {STOPPED}\n"));
        let mut info = fixture.info("running", 50);
        info.start_time = Some(now() - chrono::Duration::minutes(30));
        fixture.run(RUNNING, "r1", &info);
        fixture.message(RUNNING, now() - chrono::Duration::minutes(2), "DECISION", "go");
        fixture.run(STOPPED, "r1", &fixture.info("failed", 0));
        // Expired: a pass would delete it, status must not.
        fixture.stop_marker(STOPPED, "2026-03-01T11:00:00Z\n");
        let procs = FakeProcesses::new();
        procs.set_alive(50, true);
        let markers = FsMarkerStore::new(fixture.scope().clone());
        let settings = PassSettings::from_config(
            &MonitorConfig::default(),
            fixture.root().join("TODOs.md"),
            None,
            false,
        )
        .expect("settings");

        let rows =
            collect_status(fixture.scope(), &settings, now(), &procs, &markers).expect("status");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].decision.action, MonitorAction::Skip);
        assert_eq!(rows[1].decision.action, MonitorAction::Resume);
        assert!(markers.exists(STOPPED, Marker::StopRequested));

        let table = render_status(&rows, now());
        assert!(table.starts_with("TASK"));
        assert!(table.contains("last meaningful bus signal 2m0s ago"));
        assert!(table.contains("latest message: [DECISION] 2m0s ago go"));
    }

    #[test]
    fn dead_and_failed_tasks_still_show_activity() {
        const DEAD: &str = "task-20260301-100200-dead-task";
        let fixture = TaskFixture::new("p");
        fixture.write_todo(&format!("- [ ] {DEAD}\n- [ ] {STOPPED}\n"));
        let mut info = fixture.info("running", 77);
        info.start_time = Some(now() - chrono::Duration::hours(2));
        fixture.run(DEAD, "r1", &info);
        fixture.message(DEAD, now() - chrono::Duration::minutes(90), "ERROR", "crashed hard");
        fixture.run(STOPPED, "r1", &fixture.info("failed", 0));
        fixture.message(STOPPED, now() - chrono::Duration::minutes(5), "FACT", "gave up");
        let markers = FsMarkerStore::new(fixture.scope().clone());
        let settings = PassSettings::from_config(
            &MonitorConfig::default(),
            fixture.root().join("TODOs.md"),
            None,
            false,
        )
        .expect("settings");

        let rows = collect_status(
            fixture.scope(),
            &settings,
            now(),
            &FakeProcesses::new(),
            &markers,
        )
        .expect("status");
        assert_eq!(rows[0].decision.action, MonitorAction::Resume);
        assert!(!rows[0].snapshot.is_stale);
        let failed = rows[1].snapshot.activity.as_ref().expect("failed activity");
        assert_eq!(failed.drift_reason, "task is not running");

        let table = render_status(&rows, now());
        assert!(table.contains("latest message: [ERROR] 1h30m0s ago crashed hard"), "{table}");
        assert!(table.contains("latest message: [FACT] 5m0s ago gave up"), "{table}");
    }

    #[test]
    fn empty_table() {
        assert_eq!(render_status(&[], now()), "no pending tasks\n");
    }
}
