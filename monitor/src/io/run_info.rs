//! Run metadata records (`runs/<run-id>/run-info.json`).
//!
//! Records are written by the launcher; the monitor only reads them, except in
//! tests which write fixtures through [`write_run_info`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::RunStatus;

/// Who controls the lifecycle of a run's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessOwnership {
    /// Started by the launcher; the monitor may signal it.
    #[default]
    Managed,
    /// Observed only; the monitor must never signal it.
    External,
}

impl ProcessOwnership {
    /// Unknown and blank values are treated as managed.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("external") {
            ProcessOwnership::External
        } else {
            ProcessOwnership::Managed
        }
    }
}

/// Persisted metadata for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RunInfo {
    pub run_id: String,
    pub project_id: String,
    pub task_id: String,
    pub status: String,
    pub pid: i32,
    pub pgid: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub process_ownership: String,
    pub output_path: String,
    pub stdout_path: String,
    pub stderr_path: String,
}

impl RunInfo {
    pub fn status(&self) -> RunStatus {
        RunStatus::parse(&self.status)
    }

    pub fn ownership(&self) -> ProcessOwnership {
        ProcessOwnership::parse(&self.process_ownership)
    }

    /// Process group to signal, falling back to the pid when no group was recorded.
    pub fn signal_group(&self) -> Option<i32> {
        [self.pgid, self.pid].into_iter().find(|id| *id > 0)
    }
}

/// Load run metadata from disk.
pub fn load_run_info(path: &Path) -> Result<RunInfo> {
    debug!(path = %path.display(), "loading run info");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run info {}", path.display()))?;
    let info: RunInfo = serde_json::from_str(&contents)
        .with_context(|| format!("parse run info {}", path.display()))?;
    debug!(run_id = %info.run_id, status = %info.status, pid = info.pid, "run info loaded");
    Ok(info)
}

/// Atomically write run metadata to disk (temp file + rename).
pub fn write_run_info(path: &Path, info: &RunInfo) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(info)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("run info path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp run info {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run info {}", path.display()))?;
    Ok(())
}
