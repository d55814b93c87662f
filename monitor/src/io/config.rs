//! Monitor configuration (TOML).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::core::todo::{DEFAULT_TASK_ID_PATTERN, TaskIdPattern};

/// Monitor configuration.
///
/// Intended to be edited by humans. Missing fields take their defaults, and
/// command-line flags override file values.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between poll cycles in daemon mode. `0` runs a single pass.
    pub interval_secs: u64,

    /// Silence on a running task longer than this marks it stale. `0` disables
    /// drift detection.
    pub stale_after_secs: u64,

    /// Delay between consecutive launching actions within one cycle.
    pub rate_limit_ms: u64,

    /// How long a user stop suppresses automatic restarts.
    pub stop_window_secs: u64,

    pub stop_poll_interval_ms: u64,
    pub stop_timeout_secs: u64,

    /// Length cap for message previews in `monitor status`.
    pub body_preview_chars: usize,

    /// Regex that extracts a task id from a checklist line.
    pub task_id_pattern: String,

    pub launcher: LauncherConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LauncherConfig {
    /// Command run for start/resume/recover (e.g. `["run-agent", "{project}", "{task}"]`).
    /// Empty means launches are reported but skipped.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 24 * 60 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stale_after_secs: 20 * 60,
            rate_limit_ms: 2_000,
            stop_window_secs: 60,
            stop_poll_interval_ms: 500,
            stop_timeout_secs: 30,
            body_preview_chars: 96,
            task_id_pattern: DEFAULT_TASK_ID_PATTERN.to_string(),
            launcher: LauncherConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stop_poll_interval_ms == 0 {
            return Err(anyhow!("stop_poll_interval_ms must be > 0"));
        }
        if self.body_preview_chars == 0 {
            return Err(anyhow!("body_preview_chars must be > 0"));
        }
        if self.task_id_pattern.trim().is_empty() {
            return Err(anyhow!("task_id_pattern must not be empty"));
        }
        TaskIdPattern::new(&self.task_id_pattern)?;
        if let Some(program) = self.launcher.command.first()
            && program.trim().is_empty()
        {
            return Err(anyhow!("launcher.command program must not be empty"));
        }
        if self.launcher.timeout_secs == 0 {
            return Err(anyhow!("launcher.timeout_secs must be > 0"));
        }
        if self.launcher.output_limit_bytes == 0 {
            return Err(anyhow!("launcher.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn stop_window(&self) -> Duration {
        Duration::from_secs(self.stop_window_secs)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn task_id_pattern(&self) -> Result<TaskIdPattern> {
        TaskIdPattern::new(&self.task_id_pattern)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MonitorConfig::default()`.
pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    if !path.exists() {
        let cfg = MonitorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MonitorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
