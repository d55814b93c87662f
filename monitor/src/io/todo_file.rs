//! The declared task list on disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::todo::{TaskIdPattern, TodoEntry, mark_task_checked, parse_todo_entries};

/// Unchecked task entries from the checklist file.
pub fn load_todo_entries(path: &Path, pattern: &TaskIdPattern) -> Result<Vec<TodoEntry>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read todo file {}", path.display()))?;
    let entries = parse_todo_entries(&contents, pattern);
    debug!(path = %path.display(), count = entries.len(), "todo entries loaded");
    Ok(entries)
}

/// Check the line for `task_id`. Returns `false` when no unchecked line names it.
pub fn check_task_in_file(path: &Path, task_id: &str) -> Result<bool> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read todo file {}", path.display()))?;
    let Some(updated) = mark_task_checked(&contents, task_id) else {
        return Ok(false);
    };
    let tmp_path = path.with_extension("md.tmp");
    fs::write(&tmp_path, updated)
        .with_context(|| format!("write temp todo file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace todo file {}", path.display()))?;
    Ok(true)
}
