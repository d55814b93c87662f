//! Poll-driven supervisor for long-running agent tasks.
//!
//! Reads a checklist of task ids, decides per task whether to start, resume,
//! recover, finalize or skip it, and acts on that decision.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use monitor::daemon::{DaemonOptions, run_monitor};
use monitor::exit_codes;
use monitor::io::config::{MonitorConfig, load_config};
use monitor::io::launcher::CommandLauncher;
use monitor::io::layout::ScopePaths;
use monitor::io::liveness::SystemProcesses;
use monitor::io::lock::{LockHeldError, LockRaceError};
use monitor::io::markers::FsMarkerStore;
use monitor::io::terminate::{StopTimeoutError, TerminateOptions};
use monitor::logging;
use monitor::pass::{Monitor, PassSettings, describe};
use monitor::status::{collect_status, render_status};
use monitor::stop::{StopCommand, stop_task};

#[derive(Parser)]
#[command(
    name = "monitor",
    version,
    about = "Keep a checklist of agent tasks converging toward completion"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the checklist and act on each pending task.
    Run(RunArgs),
    /// Stop a task's run and suppress automatic restarts.
    Stop(StopArgs),
    /// Show what the monitor sees for each pending task, without acting.
    Status(StatusArgs),
}

#[derive(Args)]
struct ScopeArgs {
    /// Root directory holding `<project>/<task>/` trees.
    #[arg(long, default_value = "runs")]
    root: PathBuf,
    /// Project id.
    #[arg(long)]
    project: String,
    /// Monitor config (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Checklist file with `- [ ] <task-id>` entries.
    #[arg(long, default_value = "TODOs.md")]
    todo: PathBuf,
    /// Working directory for launched tasks.
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Seconds between polls. `0` runs a single pass.
    #[arg(long)]
    interval_secs: Option<u64>,
    /// Silence on a running task longer than this marks it stale.
    #[arg(long)]
    stale_after_secs: Option<u64>,
    /// Delay between consecutive actions within one poll.
    #[arg(long)]
    rate_limit_ms: Option<u64>,
    /// Print decisions without acting on them.
    #[arg(long)]
    dry_run: bool,
    /// Run one poll, wait for launched tasks, and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Args)]
struct StopArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Task id.
    #[arg(long)]
    task: String,
    /// Run id. Defaults to the latest running run.
    #[arg(long)]
    run: Option<String>,
    /// Send SIGKILL if the run does not stop within the timeout.
    #[arg(long)]
    force: bool,
    /// Never restart the task automatically.
    #[arg(long)]
    no_restart: bool,
}

#[derive(Args)]
struct StatusArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Checklist file with `- [ ] <task-id>` entries.
    #[arg(long, default_value = "TODOs.md")]
    todo: PathBuf,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<LockHeldError>().is_some() || err.downcast_ref::<LockRaceError>().is_some()
    {
        exit_codes::LOCKED
    } else if err.downcast_ref::<StopTimeoutError>().is_some() {
        exit_codes::STOP_TIMEOUT
    } else {
        exit_codes::INVALID
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Stop(args) => cmd_stop(args),
        Command::Status(args) => cmd_status(args),
    }
}

fn load(config: Option<&Path>) -> Result<MonitorConfig> {
    match config {
        Some(path) => load_config(path),
        None => {
            let cfg = MonitorConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mut cfg = load(args.scope.config.as_deref())?;
    if let Some(secs) = args.interval_secs {
        cfg.interval_secs = secs;
    }
    if let Some(secs) = args.stale_after_secs {
        cfg.stale_after_secs = secs;
    }
    if let Some(ms) = args.rate_limit_ms {
        cfg.rate_limit_ms = ms;
    }
    cfg.validate()?;

    let scope = ScopePaths::new(&args.scope.root, &args.scope.project);
    let markers = FsMarkerStore::new(scope.clone());
    let launcher = Arc::new(CommandLauncher::new(
        cfg.launcher.command.clone(),
        Duration::from_secs(cfg.launcher.timeout_secs),
        cfg.launcher.output_limit_bytes,
    ));
    let monitor = Monitor {
        scope,
        settings: PassSettings::from_config(&cfg, args.todo, args.cwd, args.dry_run)?,
        launcher,
        procs: &SystemProcesses,
        markers: &markers,
    };
    let opts = DaemonOptions {
        interval: cfg.interval(),
        once: args.once,
        max_passes: None,
    };
    run_monitor(&monitor, &opts, |event| println!("{event}"))
}

fn cmd_stop(args: StopArgs) -> Result<()> {
    let cfg = load(args.scope.config.as_deref())?;
    let scope = ScopePaths::new(&args.scope.root, &args.scope.project);
    let markers = FsMarkerStore::new(scope.clone());
    let request = StopCommand {
        task_id: args.task,
        run_id: args.run,
        no_restart: args.no_restart,
        terminate: TerminateOptions {
            poll_interval: cfg.stop_poll_interval(),
            timeout: cfg.stop_timeout(),
            force: args.force,
        },
    };
    let outcome = stop_task(&scope, &request, Utc::now(), &SystemProcesses, &markers)?;
    println!("{}", describe(&outcome));
    Ok(())
}

fn cmd_status(args: StatusArgs) -> Result<()> {
    let cfg = load(args.scope.config.as_deref())?;
    let scope = ScopePaths::new(&args.scope.root, &args.scope.project);
    let markers = FsMarkerStore::new(scope.clone());
    let settings = PassSettings::from_config(&cfg, args.todo, None, true)?;
    let now = Utc::now();
    let rows = collect_status(&scope, &settings, now, &SystemProcesses, &markers)?;
    print!("{}", render_status(&rows, now));
    Ok(())
}
