//! Canonical on-disk layout for a monitored scope.
//!
//! ```text
//! <root>/<project>/.monitor.pid
//! <root>/<project>/<task>/DONE
//! <root>/<project>/<task>/STOP-REQUESTED
//! <root>/<project>/<task>/TASK.md
//! <root>/<project>/<task>/TASK-MESSAGE-BUS.md
//! <root>/<project>/<task>/runs/<run-id>/run-info.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const DONE_FILE: &str = "DONE";
pub const STOP_REQUESTED_FILE: &str = "STOP-REQUESTED";
pub const TASK_FILE: &str = "TASK.md";
pub const MESSAGE_BUS_FILE: &str = "TASK-MESSAGE-BUS.md";
pub const RUN_INFO_FILE: &str = "run-info.json";
pub const LOCK_FILE: &str = ".monitor.pid";

/// Paths for one `(root, project)` scope.
#[derive(Debug, Clone)]
pub struct ScopePaths {
    pub root: PathBuf,
    pub project_id: String,
    pub project_dir: PathBuf,
    pub lock_path: PathBuf,
}

impl ScopePaths {
    pub fn new(root: impl Into<PathBuf>, project_id: &str) -> Self {
        let root = root.into();
        let project_dir = root.join(project_id);
        Self {
            lock_path: project_dir.join(LOCK_FILE),
            project_dir,
            project_id: project_id.to_string(),
            root,
        }
    }

    pub fn task(&self, task_id: &str) -> TaskPaths {
        TaskPaths::new(&self.project_dir, task_id)
    }
}

/// Paths for one task directory.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub task_id: String,
    pub task_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub done_path: PathBuf,
    pub stop_request_path: PathBuf,
    pub task_file_path: PathBuf,
    pub message_bus_path: PathBuf,
}

impl TaskPaths {
    pub fn new(project_dir: &Path, task_id: &str) -> Self {
        let task_dir = project_dir.join(task_id);
        Self {
            task_id: task_id.to_string(),
            runs_dir: task_dir.join("runs"),
            done_path: task_dir.join(DONE_FILE),
            stop_request_path: task_dir.join(STOP_REQUESTED_FILE),
            task_file_path: task_dir.join(TASK_FILE),
            message_bus_path: task_dir.join(MESSAGE_BUS_FILE),
            task_dir,
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn run_info_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(RUN_INFO_FILE)
    }

    /// Run ids sorted ascending. Run ids are built to sort chronologically, so the
    /// last element is the latest run. A missing runs directory yields no runs.
    pub fn list_run_ids(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.runs_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.runs_dir.display()));
            }
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read {}", self.runs_dir.display()))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Resolve a path recorded in run metadata: absolute paths are kept, relative
/// ones are joined onto the run directory. Blank values resolve to `None`.
pub fn resolve_run_path(recorded: &str, run_dir: &Path) -> Option<PathBuf> {
    let trimmed = recorded.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = Path::new(trimmed);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        Some(run_dir.join(path))
    }
}
