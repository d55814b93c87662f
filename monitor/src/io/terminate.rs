//! Graceful-then-forceful shutdown of a run's process group.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::RunStatus;
use crate::io::liveness::{Liveness, NoSuchGroupError, Signaller, is_run_alive};
use crate::io::run_info::{ProcessOwnership, RunInfo};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The run's process is not controlled by this supervisor.
#[derive(Debug, Error)]
#[error("run {run_id} is externally owned and cannot be stopped by the monitor")]
pub struct ExternallyOwnedError {
    pub run_id: String,
}

#[derive(Debug, Error)]
#[error("run {run_id} has no valid pid/pgid in run info")]
pub struct MissingProcessIdError {
    pub run_id: String,
}

/// The process survived the graceful window and force was not requested.
#[derive(Debug, Error)]
#[error("run {run_id} (pid {pid}) did not stop within {timeout:?}; use --force to send SIGKILL")]
pub struct StopTimeoutError {
    pub run_id: String,
    pub pid: i32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TerminateOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Escalate to SIGKILL when the graceful window expires.
    pub force: bool,
}

impl Default for TerminateOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Recorded status is not running; nothing was signalled.
    NotRunning { run_id: String, status: RunStatus },
    /// Recorded as running but the process was already gone.
    AlreadyDead { run_id: String, pid: i32 },
    /// Exited after the graceful signal.
    Stopped { run_id: String, pid: i32 },
    /// Survived the graceful window and was killed.
    Killed { run_id: String, pid: i32 },
}

/// Stop the process group recorded in `info`.
#[instrument(skip_all, fields(run_id = %info.run_id, pid = info.pid, pgid = info.pgid, force = opts.force))]
pub fn terminate_run<P: Liveness + Signaller>(
    info: &RunInfo,
    procs: &P,
    opts: &TerminateOptions,
) -> Result<TerminateOutcome> {
    let status = info.status();
    if status != RunStatus::Running {
        return Ok(TerminateOutcome::NotRunning {
            run_id: info.run_id.clone(),
            status,
        });
    }
    if info.ownership() == ProcessOwnership::External {
        return Err(ExternallyOwnedError {
            run_id: info.run_id.clone(),
        }
        .into());
    }
    let pgid = info.signal_group().ok_or_else(|| MissingProcessIdError {
        run_id: info.run_id.clone(),
    })?;

    if !is_run_alive(procs, info) {
        return Ok(TerminateOutcome::AlreadyDead {
            run_id: info.run_id.clone(),
            pid: info.pid,
        });
    }

    info!("sending SIGTERM to process group");
    if let Err(err) = procs.terminate_group(pgid) {
        if err.downcast_ref::<NoSuchGroupError>().is_some() {
            debug!("process group exited before SIGTERM");
            return Ok(TerminateOutcome::AlreadyDead {
                run_id: info.run_id.clone(),
                pid: info.pid,
            });
        }
        return Err(err).with_context(|| format!("terminate process group (pgid={pgid})"));
    }

    let deadline = Instant::now() + opts.timeout;
    while Instant::now() < deadline {
        thread::sleep(opts.poll_interval);
        if !is_run_alive(procs, info) {
            return Ok(TerminateOutcome::Stopped {
                run_id: info.run_id.clone(),
                pid: info.pid,
            });
        }
    }

    if !opts.force {
        return Err(StopTimeoutError {
            run_id: info.run_id.clone(),
            pid: info.pid,
            timeout: opts.timeout,
        }
        .into());
    }

    warn!(timeout = ?opts.timeout, "process group did not stop, sending SIGKILL");
    if let Err(err) = procs.kill_group(pgid) {
        if err.downcast_ref::<NoSuchGroupError>().is_some() {
            return Ok(TerminateOutcome::Stopped {
                run_id: info.run_id.clone(),
                pid: info.pid,
            });
        }
        return Err(err).with_context(|| format!("kill process group (pgid={pgid})"));
    }
    Ok(TerminateOutcome::Killed {
        run_id: info.run_id.clone(),
        pid: info.pid,
    })
}
