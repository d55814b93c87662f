//! Task state assessment: on-disk evidence to [`TaskSnapshot`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::core::types::{RunStatus, TaskSnapshot};
use crate::io::activity::{ActivitySettings, collect_activity_signals};
use crate::io::layout::{ScopePaths, resolve_run_path};
use crate::io::liveness::{Liveness, is_run_alive};
use crate::io::markers::{Marker, MarkerStore};
use crate::io::run_info::{RunInfo, load_run_info};

/// Name of the output artifact when the run records none.
pub const DEFAULT_OUTPUT_FILE: &str = "output.md";

/// Build a snapshot for one task.
///
/// Never fails: an unreadable runs directory or run record yields a
/// conservative `Unknown` snapshot instead.
#[instrument(skip_all, fields(task_id = %task_id))]
pub fn assess_task<L: Liveness, S: MarkerStore>(
    scope: &ScopePaths,
    task_id: &str,
    settings: &ActivitySettings,
    now: DateTime<Utc>,
    liveness: &L,
    markers: &S,
) -> TaskSnapshot {
    let task = scope.task(task_id);
    if !task.task_dir.is_dir() {
        return TaskSnapshot::absent(task_id);
    }

    let mut snapshot = TaskSnapshot {
        exists: true,
        done: markers.exists(task_id, Marker::Done),
        ..TaskSnapshot::absent(task_id)
    };

    let run_ids = match task.list_run_ids() {
        Ok(ids) => ids,
        Err(err) => {
            warn!(err = %err, "cannot list runs");
            snapshot.has_runs = true;
            snapshot.status = RunStatus::Unknown;
            return snapshot;
        }
    };
    let Some(latest) = run_ids.last() else {
        return snapshot;
    };
    snapshot.has_runs = true;
    snapshot.latest_run_id = Some(latest.clone());

    let info = match load_run_info(&task.run_info_path(latest)) {
        Ok(info) => info,
        Err(err) => {
            debug!(run_id = %latest, err = %format!("{err:#}"), "run info unreadable");
            snapshot.status = RunStatus::Unknown;
            return snapshot;
        }
    };

    snapshot.status = info.status();
    let run_dir = task.run_dir(latest);
    match snapshot.status {
        RunStatus::Running => {
            snapshot.pid_alive = is_run_alive(liveness, &info);
            if snapshot.pid_alive && !settings.threshold.is_zero() {
                let signal = collect_activity_signals(&task, latest, &info, settings, now);
                snapshot.is_stale = signal.drift_risk;
                snapshot.activity = Some(signal);
            }
        }
        RunStatus::Completed => {
            snapshot.output_nonempty = has_nonempty_output(&output_artifact_path(&run_dir, &info));
        }
        _ => {}
    }

    debug!(
        status = %snapshot.status,
        pid_alive = snapshot.pid_alive,
        is_stale = snapshot.is_stale,
        "task assessed"
    );
    snapshot
}

/// Recorded output path resolved in `run_dir`, else `output.md` there.
pub fn output_artifact_path(run_dir: &Path, info: &RunInfo) -> PathBuf {
    resolve_run_path(&info.output_path, run_dir).unwrap_or_else(|| run_dir.join(DEFAULT_OUTPUT_FILE))
}

/// Whether the file exists and holds non-whitespace text.
pub fn has_nonempty_output(path: &Path) -> bool {
    match fs::read(path) {
        Ok(bytes) => !String::from_utf8_lossy(&bytes).trim().is_empty(),
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), err = %err, "cannot read output artifact");
            }
            false
        }
    }
}

/// Latest run whose recorded status is running, newest first.
pub fn latest_running_run(scope: &ScopePaths, task_id: &str) -> Result<Option<(String, RunInfo)>> {
    let task = scope.task(task_id);
    let run_ids = task
        .list_run_ids()
        .with_context(|| format!("list runs for task {task_id}"))?;
    for run_id in run_ids.iter().rev() {
        match load_run_info(&task.run_info_path(run_id)) {
            Ok(info) if info.status() == RunStatus::Running => {
                return Ok(Some((run_id.clone(), info)));
            }
            Ok(_) => {}
            Err(err) => debug!(run_id = %run_id, err = %err, "skipping unreadable run info"),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::io::markers::FsMarkerStore;
    use crate::test_support::{FakeProcesses, TaskFixture};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 40, 0)
            .single()
            .expect("valid time")
    }

    fn settings() -> ActivitySettings {
        ActivitySettings {
            threshold: Duration::from_secs(20 * 60),
            preview_chars: 96,
        }
    }

    fn assess(fixture: &TaskFixture, task_id: &str, procs: &FakeProcesses) -> TaskSnapshot {
        let markers = FsMarkerStore::new(fixture.scope().clone());
        assess_task(fixture.scope(), task_id, &settings(), now(), procs, &markers)
    }

    #[test]
    fn absent_task_directory() {
        let fixture = TaskFixture::new("p");
        let snapshot = assess(&fixture, "t", &FakeProcesses::new());
        assert_eq!(snapshot, TaskSnapshot::absent("t"));
    }

    #[test]
    fn task_without_runs() {
        let fixture = TaskFixture::new("p");
        fixture.task_dir("t");
        fixture.mark_done("t");
        let snapshot = assess(&fixture, "t", &FakeProcesses::new());
        assert!(snapshot.exists);
        assert!(snapshot.done);
        assert!(!snapshot.has_runs);
        assert_eq!(snapshot.latest_run_id, None);
    }

    #[test]
    fn unreadable_run_info_is_unknown() {
        let fixture = TaskFixture::new("p");
        fixture.raw_run_info("t", "r1", "{ not json");
        let procs = FakeProcesses::new();
        let snapshot = assess(&fixture, "t", &procs);
        assert_eq!(snapshot.status, RunStatus::Unknown);
        assert!(!snapshot.pid_alive);
        assert_eq!(snapshot.latest_run_id.as_deref(), Some("r1"));
    }

    #[test]
    fn latest_run_wins() {
        let fixture = TaskFixture::new("p");
        fixture.run("t", "20260301-100000-1", &fixture.info("failed", 0));
        fixture.run("t", "20260301-110000-1", &fixture.info("completed", 0));
        fixture.output("t", "20260301-110000-1", "  \n");
        let snapshot = assess(&fixture, "t", &FakeProcesses::new());
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.latest_run_id.as_deref(), Some("20260301-110000-1"));
        assert!(!snapshot.output_nonempty);
    }

    #[test]
    fn completed_with_output() {
        let fixture = TaskFixture::new("p");
        fixture.run("t", "r1", &fixture.info("completed", 0));
        fixture.output("t", "r1", "all done\n");
        assert!(assess(&fixture, "t", &FakeProcesses::new()).output_nonempty);
    }

    #[test]
    fn unicode_whitespace_output_is_empty() {
        let fixture = TaskFixture::new("p");
        fixture.run("t", "r1", &fixture.info("completed", 0));
        fixture.output("t", "r1", "\u{a0}\u{0b}\u{2003}\n");
        assert!(!assess(&fixture, "t", &FakeProcesses::new()).output_nonempty);
    }

    #[test]
    fn running_and_silent_is_stale() {
        let fixture = TaskFixture::new("p");
        let mut info = fixture.info("running", 42);
        info.start_time = Some(now() - chrono::Duration::hours(1));
        fixture.run("t", "r1", &info);
        fixture.message("t", now() - chrono::Duration::minutes(35), "FACT", "checkpoint");
        let procs = FakeProcesses::new();
        procs.set_alive(42, true);

        let snapshot = assess(&fixture, "t", &procs);
        assert!(snapshot.pid_alive);
        assert!(snapshot.is_stale);
        let activity = snapshot.activity.expect("activity");
        assert!(activity.drift_reason.contains("no meaningful bus signal"));
    }

    #[test]
    fn dead_running_task_is_never_stale() {
        let fixture = TaskFixture::new("p");
        let mut info = fixture.info("running", 42);
        info.start_time = Some(now() - chrono::Duration::hours(5));
        fixture.run("t", "r1", &info);
        let snapshot = assess(&fixture, "t", &FakeProcesses::new());
        assert!(!snapshot.pid_alive);
        assert!(!snapshot.is_stale);
        assert!(snapshot.activity.is_none());
    }

    #[test]
    fn zero_threshold_disables_drift() {
        let fixture = TaskFixture::new("p");
        let mut info = fixture.info("running", 42);
        info.start_time = Some(now() - chrono::Duration::hours(5));
        fixture.run("t", "r1", &info);
        let procs = FakeProcesses::new();
        procs.set_alive(42, true);
        let markers = FsMarkerStore::new(fixture.scope().clone());
        let settings = ActivitySettings {
            threshold: Duration::ZERO,
            preview_chars: 96,
        };
        let snapshot = assess_task(fixture.scope(), "t", &settings, now(), &procs, &markers);
        assert!(snapshot.pid_alive);
        assert!(!snapshot.is_stale);
    }

    #[test]
    fn latest_running_run_skips_finished_runs() {
        let fixture = TaskFixture::new("p");
        fixture.run("t", "r1", &fixture.info("running", 7));
        fixture.run("t", "r2", &fixture.info("completed", 8));
        let (run_id, info) = latest_running_run(fixture.scope(), "t")
            .expect("scan")
            .expect("running run");
        assert_eq!(run_id, "r1");
        assert_eq!(info.pid, 7);
    }
}
