//! One poll cycle: read the checklist, assess and decide per task, act.
//!
//! Tasks are processed sequentially in declaration order. Launches run on
//! their own threads and are tracked in a [`LaunchGroup`]; the caller decides
//! whether to wait for them (single pass) or reap them later (daemon).

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::decision::decide;
use crate::core::todo::{TaskIdPattern, TodoEntry};
use crate::core::types::{MonitorAction, MonitorDecision};
use crate::io::activity::ActivitySettings;
use crate::io::assess::{assess_task, latest_running_run};
use crate::io::config::MonitorConfig;
use crate::io::launcher::{LaunchRequest, Launcher};
use crate::io::layout::ScopePaths;
use crate::io::liveness::{Liveness, Signaller};
use crate::io::markers::{Marker, MarkerStore};
use crate::io::stop_request::StopRequests;
use crate::io::terminate::{TerminateOptions, TerminateOutcome, terminate_run};
use crate::io::todo_file::{check_task_in_file, load_todo_entries};

/// Per-pass settings, resolved from config and command-line flags.
#[derive(Debug, Clone)]
pub struct PassSettings {
    pub todo_path: PathBuf,
    /// Working directory handed to the launcher.
    pub cwd: Option<PathBuf>,
    pub task_id_pattern: TaskIdPattern,
    pub activity: ActivitySettings,
    /// Delay inserted between consecutive non-skip actions.
    pub rate_limit: Duration,
    pub stop_window: Duration,
    /// Termination used by recover. Force is always on for recovery.
    pub terminate: TerminateOptions,
    /// Report decisions without acting on them.
    pub dry_run: bool,
}

impl PassSettings {
    pub fn from_config(
        cfg: &MonitorConfig,
        todo_path: PathBuf,
        cwd: Option<PathBuf>,
        dry_run: bool,
    ) -> Result<Self> {
        Ok(Self {
            todo_path,
            cwd,
            task_id_pattern: cfg.task_id_pattern()?,
            activity: ActivitySettings {
                threshold: cfg.stale_after(),
                preview_chars: cfg.body_preview_chars,
            },
            rate_limit: cfg.rate_limit(),
            stop_window: cfg.stop_window(),
            terminate: TerminateOptions {
                poll_interval: cfg.stop_poll_interval(),
                timeout: cfg.stop_timeout(),
                force: true,
            },
            dry_run,
        })
    }
}

/// Something worth telling the operator about during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassEvent {
    NoPendingTasks { todo_path: PathBuf },
    Checking { count: usize, todo_path: PathBuf },
    Decision { task_id: String, decision: MonitorDecision },
    Finalized { task_id: String },
    StoppedStale { task_id: String, outcome: TerminateOutcome },
    Launched { task_id: String, action: MonitorAction },
    LaunchSkipped { task_id: String, reason: String },
    LaunchCompleted { task_id: String },
    LaunchFailed { task_id: String, error: String },
    Warning { message: String },
    Error { message: String },
}

impl fmt::Display for PassEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassEvent::NoPendingTasks { todo_path } => write!(
                f,
                "monitor: no pending task IDs found in {}",
                todo_path.display()
            ),
            PassEvent::Checking { count, todo_path } => write!(
                f,
                "monitor: checking {count} pending task(s) from {}",
                todo_path.display()
            ),
            PassEvent::Decision { task_id, decision } => write!(
                f,
                "  [{:<8}] {task_id} — {}",
                decision.action.as_str(),
                decision.reason
            ),
            PassEvent::Finalized { task_id } => {
                write!(f, "  [OK]    finalized {task_id} (DONE created)")
            }
            PassEvent::StoppedStale { task_id, outcome } => {
                write!(f, "  [OK]    stopped stale task {task_id} ({})", describe(outcome))
            }
            PassEvent::Launched { task_id, action } => {
                write!(f, "  [OK]    launched {action} for {task_id}")
            }
            PassEvent::LaunchSkipped { task_id, reason } => {
                write!(f, "  [SKIP]  {task_id}: {reason}")
            }
            PassEvent::LaunchCompleted { task_id } => {
                write!(f, "  [OK]    run completed for {task_id}")
            }
            PassEvent::LaunchFailed { task_id, error } => {
                write!(f, "  [ERROR] run {task_id}: {error}")
            }
            PassEvent::Warning { message } => write!(f, "  [WARN]  {message}"),
            PassEvent::Error { message } => write!(f, "  [ERROR] {message}"),
        }
    }
}

/// Short human description of a terminator outcome.
pub fn describe(outcome: &TerminateOutcome) -> String {
    match outcome {
        TerminateOutcome::NotRunning { run_id, status } => {
            format!("run {run_id} is not running (status {status})")
        }
        TerminateOutcome::AlreadyDead { run_id, pid } => {
            format!("run {run_id} (pid {pid}) was already dead")
        }
        TerminateOutcome::Stopped { run_id, pid } => {
            format!("run {run_id} (pid {pid}) stopped")
        }
        TerminateOutcome::Killed { run_id, pid } => {
            format!("run {run_id} (pid {pid}) killed after timeout")
        }
    }
}

struct PendingLaunch {
    task_id: String,
    handle: JoinHandle<Result<()>>,
}

/// Join point for launches dispatched by one or more passes.
#[derive(Default)]
pub struct LaunchGroup {
    pending: Vec<PendingLaunch>,
}

impl LaunchGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Collect results of launches that already finished, leaving the rest.
    pub fn reap_finished(&mut self) -> Vec<PassEvent> {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|launch| launch.handle.is_finished());
        self.pending = running;
        finished.into_iter().map(finish).collect()
    }

    /// Wait for every pending launch.
    pub fn join_all(&mut self) -> Vec<PassEvent> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(finish)
            .collect()
    }
}

fn finish(launch: PendingLaunch) -> PassEvent {
    match launch.handle.join() {
        Ok(Ok(())) => PassEvent::LaunchCompleted {
            task_id: launch.task_id,
        },
        Ok(Err(err)) => PassEvent::LaunchFailed {
            task_id: launch.task_id,
            error: format!("{err:#}"),
        },
        Err(_) => PassEvent::LaunchFailed {
            task_id: launch.task_id,
            error: "launch thread panicked".to_string(),
        },
    }
}

/// Per-task decisions of one pass, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub decisions: Vec<(String, MonitorDecision)>,
}

impl PassSummary {
    pub fn decision(&self, task_id: &str) -> Option<&MonitorDecision> {
        self.decisions
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, decision)| decision)
    }
}

/// Everything a pass needs: scope, settings and the collaborators it drives.
pub struct Monitor<'a, L, P, S> {
    pub scope: ScopePaths,
    pub settings: PassSettings,
    pub launcher: Arc<L>,
    pub procs: &'a P,
    pub markers: &'a S,
}

impl<L, P, S> Monitor<'_, L, P, S>
where
    L: Launcher + 'static,
    P: Liveness + Signaller,
    S: MarkerStore,
{
    /// Run one poll cycle at `now`, reporting through `on_event`.
    ///
    /// Only a checklist read failure aborts the pass; per-task failures are
    /// reported and the pass moves on.
    #[instrument(skip_all, fields(project = %self.scope.project_id, dry_run = self.settings.dry_run))]
    pub fn run_pass<F: FnMut(&PassEvent)>(
        &self,
        now: DateTime<Utc>,
        launches: &mut LaunchGroup,
        mut on_event: F,
    ) -> Result<PassSummary> {
        let todo_path = self.settings.todo_path.clone();
        let entries = load_todo_entries(&todo_path, &self.settings.task_id_pattern)
            .context("parse TODOs")?;
        let mut summary = PassSummary::default();
        if entries.is_empty() {
            on_event(&PassEvent::NoPendingTasks { todo_path });
            return Ok(summary);
        }
        on_event(&PassEvent::Checking {
            count: entries.len(),
            todo_path,
        });

        let stops = StopRequests::new(self.markers);
        let mut first_action = true;
        for entry in &entries {
            let task_id = entry.task_id.as_str();
            let snapshot = assess_task(
                &self.scope,
                task_id,
                &self.settings.activity,
                now,
                self.procs,
                self.markers,
            );
            let decision = decide(&snapshot, || {
                stops.check(task_id, self.settings.stop_window, now)
            });
            debug!(task_id, action = %decision.action, reason = %decision.reason, "decided");
            on_event(&PassEvent::Decision {
                task_id: task_id.to_string(),
                decision: decision.clone(),
            });
            let action = decision.action;
            summary.decisions.push((task_id.to_string(), decision));

            if action == MonitorAction::Skip {
                continue;
            }
            // Pacing applies in dry-run too so previews match live timing.
            if !first_action && !self.settings.rate_limit.is_zero() {
                thread::sleep(self.settings.rate_limit);
            }
            first_action = false;
            if self.settings.dry_run {
                continue;
            }

            match action {
                MonitorAction::Finalize => self.finalize(task_id, &mut on_event),
                MonitorAction::Recover => {
                    self.stop_stale(task_id, &mut on_event);
                    self.dispatch(entry, action, launches, &mut on_event);
                }
                MonitorAction::Start | MonitorAction::Resume => {
                    if self.prepare_task_dir(entry, &mut on_event) {
                        self.dispatch(entry, action, launches, &mut on_event);
                    }
                }
                MonitorAction::Skip => {}
            }
        }
        Ok(summary)
    }

    fn finalize<F: FnMut(&PassEvent)>(&self, task_id: &str, on_event: &mut F) {
        if let Err(err) = self.markers.write(task_id, Marker::Done, "") {
            on_event(&PassEvent::Error {
                message: format!("finalize {task_id}: {err:#}"),
            });
            return;
        }
        match check_task_in_file(&self.settings.todo_path, task_id) {
            Ok(true) => debug!(task_id, "checklist entry checked"),
            Ok(false) => debug!(task_id, "no unchecked checklist entry to update"),
            Err(err) => on_event(&PassEvent::Warning {
                message: format!(
                    "update {} for {task_id}: {err:#}",
                    self.settings.todo_path.display()
                ),
            }),
        }
        info!(task_id, "task finalized");
        on_event(&PassEvent::Finalized {
            task_id: task_id.to_string(),
        });
    }

    fn stop_stale<F: FnMut(&PassEvent)>(&self, task_id: &str, on_event: &mut F) {
        let result = latest_running_run(&self.scope, task_id).and_then(|found| {
            let (_, info) =
                found.with_context(|| format!("no running run found for task {task_id}"))?;
            terminate_run(&info, self.procs, &self.settings.terminate)
        });
        match result {
            Ok(outcome) => on_event(&PassEvent::StoppedStale {
                task_id: task_id.to_string(),
                outcome,
            }),
            Err(err) => on_event(&PassEvent::Warning {
                message: format!("stop {task_id}: {err:#}"),
            }),
        }
    }

    /// Create the task directory and seed `TASK.md`. Returns `false` on failure.
    fn prepare_task_dir<F: FnMut(&PassEvent)>(&self, entry: &TodoEntry, on_event: &mut F) -> bool {
        let task = self.scope.task(&entry.task_id);
        if let Err(err) = fs::create_dir_all(&task.task_dir) {
            on_event(&PassEvent::Error {
                message: format!("mkdir {}: {err}", entry.task_id),
            });
            return false;
        }
        if task.task_file_path.exists() {
            return true;
        }
        if let Err(err) = fs::write(&task.task_file_path, format!("{}\n", entry.text)) {
            on_event(&PassEvent::Error {
                message: format!("write TASK.md for {}: {err}", entry.task_id),
            });
            return false;
        }
        true
    }

    fn dispatch<F: FnMut(&PassEvent)>(
        &self,
        entry: &TodoEntry,
        action: MonitorAction,
        launches: &mut LaunchGroup,
        on_event: &mut F,
    ) {
        let task_id = entry.task_id.clone();
        if !self.launcher.is_configured() {
            on_event(&PassEvent::LaunchSkipped {
                task_id,
                reason: "no launcher command configured".to_string(),
            });
            return;
        }

        // Relaunching is itself evidence that neither marker applies anymore.
        for marker in [Marker::Done, Marker::StopRequested] {
            if let Err(err) = self.markers.remove(&task_id, marker) {
                warn!(task_id = %task_id, ?marker, err = %err, "failed to clear marker before launch");
            }
        }

        let task = self.scope.task(&task_id);
        let request = LaunchRequest {
            root: self.scope.root.clone(),
            project_id: self.scope.project_id.clone(),
            task_id: task_id.clone(),
            action,
            task_dir: task.task_dir,
            task_file: task.task_file_path,
            cwd: self.settings.cwd.clone(),
        };
        let launcher = Arc::clone(&self.launcher);
        let spawned = thread::Builder::new()
            .name(format!("launch-{task_id}"))
            .spawn(move || launcher.launch(&request));
        match spawned {
            Ok(handle) => {
                launches.pending.push(PendingLaunch {
                    task_id: task_id.clone(),
                    handle,
                });
                on_event(&PassEvent::Launched { task_id, action });
            }
            Err(err) => on_event(&PassEvent::LaunchFailed {
                task_id,
                error: format!("spawn launch thread: {err}"),
            }),
        }
    }
}
