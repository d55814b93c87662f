//! Launcher abstraction for task execution.
//!
//! The [`Launcher`] trait decouples the poll cycle from whatever actually runs
//! an agent. [`CommandLauncher`] spawns a configured command; tests use
//! `RecordingLauncher` from `test_support`.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::types::MonitorAction;
use crate::io::process::run_bounded;

/// Everything a launcher needs to (re)start one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub root: PathBuf,
    pub project_id: String,
    pub task_id: String,
    pub action: MonitorAction,
    pub task_dir: PathBuf,
    pub task_file: PathBuf,
    /// Working directory for the launched process.
    pub cwd: Option<PathBuf>,
}

/// Abstraction over task execution backends.
///
/// `launch` blocks until the launched work finishes; the poll cycle runs it on
/// its own thread.
pub trait Launcher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<()>;

    /// `false` when launches should be reported but not performed.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Runs an external command per launch.
///
/// Arguments may contain `{root}`, `{project}`, `{task}`, `{task_dir}`,
/// `{task_file}` and `{action}` placeholders. The same values are exported as
/// `MONITOR_*` environment variables.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandLauncher {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    fn build_command(&self, request: &LaunchRequest) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("launcher command is not configured"))?;
        let mut cmd = Command::new(expand(program, request));
        cmd.args(args.iter().map(|arg| expand(arg, request)))
            .env("MONITOR_ROOT", &request.root)
            .env("MONITOR_PROJECT", &request.project_id)
            .env("MONITOR_TASK", &request.task_id)
            .env("MONITOR_TASK_DIR", &request.task_dir)
            .env("MONITOR_TASK_FILE", &request.task_file)
            .env("MONITOR_ACTION", request.action.as_str());
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a recover can signal the whole tree.
            cmd.process_group(0);
        }
        Ok(cmd)
    }
}

impl Launcher for CommandLauncher {
    #[instrument(skip_all, fields(task_id = %request.task_id, action = %request.action))]
    fn launch(&self, request: &LaunchRequest) -> Result<()> {
        let cmd = self.build_command(request)?;
        info!("launching task");
        let output = run_bounded(cmd, self.timeout, self.output_limit_bytes)?;
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "launcher timed out");
            bail!("launcher timed out after {:?}", self.timeout);
        }
        if !output.success() {
            let detail = output
                .last_line()
                .map(|line| format!(": {line}"))
                .unwrap_or_default();
            bail!(
                "launcher exited with status {:?}{detail}",
                output.status.code()
            );
        }
        debug!("launcher finished");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}

fn expand(template: &str, request: &LaunchRequest) -> String {
    template
        .replace("{root}", &request.root.to_string_lossy())
        .replace("{project}", &request.project_id)
        .replace("{task_dir}", &request.task_dir.to_string_lossy())
        .replace("{task_file}", &request.task_file.to_string_lossy())
        .replace("{task}", &request.task_id)
        .replace("{action}", request.action.as_str())
}
