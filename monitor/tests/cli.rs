//! CLI tests for the `monitor` binary.
//!
//! Spawns the binary against a temporary task tree and checks exit codes and
//! printed output.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use monitor::exit_codes;

const TASK: &str = "task-20260301-090000-cli-task";

fn monitor(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_monitor"))
        .current_dir(root)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("run monitor")
}

#[test]
fn daemon_exits_locked_when_another_monitor_is_live() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("TODOs.md"), format!("- [ ] {TASK}\n")).expect("write todo");
    let project_dir = temp.path().join("runs").join("p");
    fs::create_dir_all(&project_dir).expect("mkdir");
    // The test process itself stands in for the live owner.
    fs::write(
        project_dir.join(".monitor.pid"),
        format!("{}\n", std::process::id()),
    )
    .expect("write lock");

    let out = monitor(temp.path(), &["run", "--project", "p", "--interval-secs", "1"]);

    assert_eq!(out.status.code(), Some(exit_codes::LOCKED));
    assert!(String::from_utf8_lossy(&out.stderr).contains("already running"));
}

#[test]
fn once_dry_run_prints_decisions_without_acting() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("TODOs.md"), format!("- [ ] {TASK}\n")).expect("write todo");

    let out = monitor(temp.path(), &["run", "--project", "p", "--once", "--dry-run"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("checking 1 pending task(s)"), "{stdout}");
    assert!(stdout.contains(&format!("[start   ] {TASK}")), "{stdout}");
    assert!(!temp.path().join("runs/p").join(TASK).exists());
}

#[test]
fn missing_checklist_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");

    let out = monitor(temp.path(), &["run", "--project", "p", "--once"]);

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("TODOs.md"));
}

#[test]
fn status_lists_pending_tasks() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("TODOs.md"), format!("- [ ] {TASK}\n")).expect("write todo");

    let out = monitor(temp.path(), &["status", "--project", "p"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("TASK"), "{stdout}");
    assert!(stdout.contains(TASK));
    assert!(stdout.contains("reason: task has no runs yet"));
}

#[test]
fn stop_of_unknown_task_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");

    let out = monitor(temp.path(), &["stop", "--project", "p", "--task", TASK]);

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}
