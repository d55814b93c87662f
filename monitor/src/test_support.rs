//! Test-only fixtures and fakes.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use tempfile::TempDir;

use crate::core::types::MonitorAction;
use crate::io::launcher::{LaunchRequest, Launcher};
use crate::io::layout::ScopePaths;
use crate::io::liveness::{Liveness, NoSuchGroupError, Signaller};
use crate::io::run_info::{RunInfo, write_run_info};

/// A temporary `<root>/<project>` tree with helpers for task directories,
/// run records, message logs and markers.
pub struct TaskFixture {
    temp: TempDir,
    scope: ScopePaths,
}

impl TaskFixture {
    pub fn new(project_id: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let scope = ScopePaths::new(temp.path(), project_id);
        Self { temp, scope }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn scope(&self) -> &ScopePaths {
        &self.scope
    }

    /// Create (if needed) and return the task directory.
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        let dir = self.scope.task(task_id).task_dir;
        fs::create_dir_all(&dir).expect("create task dir");
        dir
    }

    /// A run record for this fixture's project.
    pub fn info(&self, status: &str, pid: i32) -> RunInfo {
        RunInfo {
            project_id: self.scope.project_id.clone(),
            status: status.to_string(),
            pid,
            pgid: pid,
            ..RunInfo::default()
        }
    }

    /// Write `runs/<run_id>/run-info.json`, filling in the ids.
    pub fn run(&self, task_id: &str, run_id: &str, info: &RunInfo) -> PathBuf {
        let task = self.scope.task(task_id);
        let run_dir = task.run_dir(run_id);
        fs::create_dir_all(&run_dir).expect("create run dir");
        let info = RunInfo {
            run_id: run_id.to_string(),
            task_id: task_id.to_string(),
            ..info.clone()
        };
        write_run_info(&task.run_info_path(run_id), &info).expect("write run info");
        run_dir
    }

    pub fn raw_run_info(&self, task_id: &str, run_id: &str, contents: &str) {
        let task = self.scope.task(task_id);
        fs::create_dir_all(task.run_dir(run_id)).expect("create run dir");
        fs::write(task.run_info_path(run_id), contents).expect("write run info");
    }

    /// Write the default output artifact (`output.md`) of a run.
    pub fn output(&self, task_id: &str, run_id: &str, contents: &str) {
        let run_dir = self.scope.task(task_id).run_dir(run_id);
        fs::create_dir_all(&run_dir).expect("create run dir");
        fs::write(run_dir.join("output.md"), contents).expect("write output");
    }

    /// Append a framed entry to the task's message log.
    pub fn message(&self, task_id: &str, ts: DateTime<Utc>, kind: &str, body: &str) {
        let path = self.scope.task(task_id).message_bus_path;
        self.task_dir(task_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .expect("open message bus");
        write!(
            file,
            "---\nts: {}\ntype: {kind}\n---\n{body}\n",
            ts.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
        .expect("append message");
    }

    pub fn mark_done(&self, task_id: &str) {
        let path = self.scope.task(task_id).done_path;
        self.task_dir(task_id);
        fs::write(path, "").expect("write DONE");
    }

    pub fn stop_marker(&self, task_id: &str, contents: &str) {
        let path = self.scope.task(task_id).stop_request_path;
        self.task_dir(task_id);
        fs::write(path, contents).expect("write stop marker");
    }

    /// Write a checklist file at the fixture root and return its path.
    pub fn write_todo(&self, contents: &str) -> PathBuf {
        let path = self.root().join("TODOs.md");
        fs::write(&path, contents).expect("write todo");
        path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Term,
    Kill,
}

#[derive(Debug, Default)]
struct ProcessTable {
    alive: HashSet<i32>,
    groups: HashMap<i32, Vec<i32>>,
    failing_group_probes: HashSet<i32>,
    ignores_term: HashSet<i32>,
    exits_before_signal: HashSet<i32>,
    signals: Vec<(i32, SignalKind)>,
}

impl ProcessTable {
    fn kill_group(&mut self, pgid: i32) {
        self.alive.remove(&pgid);
        for pid in self.groups.remove(&pgid).unwrap_or_default() {
            self.alive.remove(&pid);
        }
    }
}

/// Scripted process table implementing both [`Liveness`] and [`Signaller`].
///
/// SIGTERM kills a group unless [`ignore_term`](Self::ignore_term) was set for
/// it; SIGKILL always does. Every signal is recorded.
#[derive(Debug, Default)]
pub struct FakeProcesses {
    table: Mutex<ProcessTable>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut ProcessTable) -> T) -> T {
        let mut table = self.table.lock().expect("process table lock");
        f(&mut table)
    }

    pub fn set_alive(&self, id: i32, alive: bool) {
        self.with(|t| {
            if alive {
                t.alive.insert(id);
            } else {
                t.alive.remove(&id);
            }
        });
    }

    /// Register a live process as a member of `pgid`.
    pub fn add_process(&self, pid: i32, pgid: i32) {
        self.with(|t| {
            t.alive.insert(pid);
            if pgid > 0 {
                t.groups.entry(pgid).or_default().push(pid);
            }
        });
    }

    pub fn fail_group_probe(&self, pgid: i32) {
        self.with(|t| t.failing_group_probes.insert(pgid));
    }

    pub fn ignore_term(&self, pgid: i32) {
        self.with(|t| t.ignores_term.insert(pgid));
    }

    /// The group exits just before the next signal reaches it, which then
    /// fails with [`NoSuchGroupError`].
    pub fn exit_before_signal(&self, pgid: i32) {
        self.with(|t| t.exits_before_signal.insert(pgid));
    }

    pub fn signals(&self) -> Vec<(i32, SignalKind)> {
        self.with(|t| t.signals.clone())
    }
}

impl Liveness for FakeProcesses {
    fn is_alive(&self, pid: i32) -> bool {
        self.with(|t| t.alive.contains(&pid))
    }

    fn is_group_alive(&self, pgid: i32) -> Result<bool> {
        self.with(|t| {
            if t.failing_group_probes.contains(&pgid) {
                return Err(anyhow!("scripted group probe failure for {pgid}"));
            }
            let member_alive = t
                .groups
                .get(&pgid)
                .is_some_and(|members| members.iter().any(|pid| t.alive.contains(pid)));
            Ok(member_alive || t.alive.contains(&pgid))
        })
    }
}

impl Signaller for FakeProcesses {
    fn terminate_group(&self, pgid: i32) -> Result<()> {
        self.with(|t| {
            if t.exits_before_signal.remove(&pgid) {
                t.kill_group(pgid);
                return Err(anyhow::Error::new(NoSuchGroupError { pgid }));
            }
            t.signals.push((pgid, SignalKind::Term));
            if !t.ignores_term.contains(&pgid) {
                t.kill_group(pgid);
            }
            Ok(())
        })
    }

    fn kill_group(&self, pgid: i32) -> Result<()> {
        self.with(|t| {
            t.signals.push((pgid, SignalKind::Kill));
            t.kill_group(pgid);
        });
        Ok(())
    }
}

/// Launcher that records requests and fails for scripted tasks.
#[derive(Debug)]
pub struct RecordingLauncher {
    configured: bool,
    failing: Mutex<HashSet<String>>,
    launches: Mutex<Vec<LaunchRequest>>,
}

impl Default for RecordingLauncher {
    fn default() -> Self {
        Self {
            configured: true,
            failing: Mutex::default(),
            launches: Mutex::default(),
        }
    }
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A launcher that reports itself as not configured.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::default()
        }
    }

    pub fn fail_task(&self, task_id: &str) {
        self.failing
            .lock()
            .expect("failing lock")
            .insert(task_id.to_string());
    }

    /// `(task_id, action)` pairs sorted by task id.
    pub fn launched(&self) -> Vec<(String, MonitorAction)> {
        let mut launched: Vec<_> = self
            .launches
            .lock()
            .expect("launches lock")
            .iter()
            .map(|req| (req.task_id.clone(), req.action))
            .collect();
        launched.sort_by(|a, b| a.0.cmp(&b.0));
        launched
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.launches.lock().expect("launches lock").clone()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<()> {
        self.launches
            .lock()
            .expect("launches lock")
            .push(request.clone());
        if self
            .failing
            .lock()
            .expect("failing lock")
            .contains(&request.task_id)
        {
            return Err(anyhow!("scripted launch failure for {}", request.task_id));
        }
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}
