//! `monitor stop`: record a user stop, then terminate the task's run.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::io::assess::latest_running_run;
use crate::io::layout::ScopePaths;
use crate::io::liveness::{Liveness, Signaller};
use crate::io::markers::MarkerStore;
use crate::io::run_info::load_run_info;
use crate::io::stop_request::StopRequests;
use crate::io::terminate::{TerminateOptions, TerminateOutcome, terminate_run};

#[derive(Debug, Clone)]
pub struct StopCommand {
    pub task_id: String,
    /// Specific run to stop. Defaults to the latest running run.
    pub run_id: Option<String>,
    /// Suppress automatic restarts indefinitely instead of for the window.
    pub no_restart: bool,
    pub terminate: TerminateOptions,
}

/// Stop a task.
///
/// The stop-suppression marker is written first so a monitor polling
/// concurrently does not relaunch the task while it is being terminated.
#[instrument(skip_all, fields(project = %scope.project_id, task_id = %request.task_id))]
pub fn stop_task<P, S>(
    scope: &ScopePaths,
    request: &StopCommand,
    now: DateTime<Utc>,
    procs: &P,
    markers: &S,
) -> Result<TerminateOutcome>
where
    P: Liveness + Signaller,
    S: MarkerStore,
{
    let task_id = request.task_id.as_str();
    if !scope.task(task_id).task_dir.is_dir() {
        return Err(anyhow!(
            "task {task_id} not found in project {}",
            scope.project_id
        ));
    }
    StopRequests::new(markers).write(task_id, request.no_restart, now)?;
    info!(permanent = request.no_restart, "stop requested");

    let info = match &request.run_id {
        Some(run_id) => {
            let path = scope.task(task_id).run_info_path(run_id);
            load_run_info(&path).with_context(|| format!("read run {run_id} of task {task_id}"))?
        }
        None => {
            let (_, info) = latest_running_run(scope, task_id)?.ok_or_else(|| {
                anyhow!(
                    "no running runs found for project {} task {task_id}",
                    scope.project_id
                )
            })?;
            info
        }
    };
    terminate_run(&info, procs, &request.terminate)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::io::markers::{FsMarkerStore, Marker};
    use crate::io::terminate::ExternallyOwnedError;
    use crate::test_support::{FakeProcesses, TaskFixture};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    fn request(run_id: Option<&str>, no_restart: bool) -> StopCommand {
        StopCommand {
            task_id: "t".to_string(),
            run_id: run_id.map(str::to_string),
            no_restart,
            terminate: TerminateOptions {
                poll_interval: Duration::from_millis(1),
                timeout: Duration::from_millis(20),
                force: false,
            },
        }
    }

    #[test]
    fn stops_latest_running_run_and_writes_marker() {
        let fixture = TaskFixture::new("p");
        fixture.run("t", "r1", &fixture.info("running", 11));
        fixture.run("t", "r2", &fixture.info("running", 12));
        fixture.run("t", "r3", &fixture.info("failed", 13));
        let procs = FakeProcesses::new();
        procs.add_process(11, 11);
        procs.add_process(12, 12);
        let markers = FsMarkerStore::new(fixture.scope().clone());

        let outcome = stop_task(fixture.scope(), &request(None, false), now(), &procs, &markers)
            .expect("stop");
        assert_eq!(
            outcome,
            TerminateOutcome::Stopped {
                run_id: "r2".to_string(),
                pid: 12
            }
        );
        assert_eq!(
            markers.read("t", Marker::StopRequested).expect("read"),
            Some("2026-03-01T12:00:00Z\n".to_string())
        );
        assert!(procs.is_alive(11));
    }

    #[test]
    fn no_restart_writes_permanent_marker() {
        let fixture = TaskFixture::new("p");
        fixture.run("t", "r1", &fixture.info("completed", 11));
        let procs = FakeProcesses::new();
        let markers = FsMarkerStore::new(fixture.scope().clone());

        let outcome = stop_task(
            fixture.scope(),
            &request(Some("r1"), true),
            now(),
            &procs,
            &markers,
        )
        .expect("stop");
        assert!(matches!(outcome, TerminateOutcome::NotRunning { .. }));
        assert_eq!(
            markers.read("t", Marker::StopRequested).expect("read"),
            Some("permanent\n".to_string())
        );
    }

    #[test]
    fn no_running_run_is_an_error() {
        let fixture = TaskFixture::new("p");
        fixture.run("t", "r1", &fixture.info("failed", 11));
        let markers = FsMarkerStore::new(fixture.scope().clone());
        let err = stop_task(
            fixture.scope(),
            &request(None, false),
            now(),
            &FakeProcesses::new(),
            &markers,
        )
        .expect_err("nothing to stop");
        assert!(err.to_string().contains("no running runs"));
    }

    #[test]
    fn external_run_is_refused() {
        let fixture = TaskFixture::new("p");
        let mut info = fixture.info("running", 11);
        info.process_ownership = "external".to_string();
        fixture.run("t", "r1", &info);
        let procs = FakeProcesses::new();
        procs.add_process(11, 11);
        let markers = FsMarkerStore::new(fixture.scope().clone());

        let err = stop_task(fixture.scope(), &request(None, false), now(), &procs, &markers)
            .expect_err("external");
        assert!(err.downcast_ref::<ExternallyOwnedError>().is_some());
        assert!(procs.signals().is_empty());
    }

    #[test]
    fn unknown_task_is_an_error() {
        let fixture = TaskFixture::new("p");
        let markers = FsMarkerStore::new(fixture.scope().clone());
        let err = stop_task(
            fixture.scope(),
            &request(None, false),
            now(),
            &FakeProcesses::new(),
            &markers,
        )
        .expect_err("missing task");
        assert!(err.to_string().contains("not found"));
        assert!(!markers.exists("t", Marker::StopRequested));
    }
}
