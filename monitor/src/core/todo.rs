//! Checklist parsing and the single mutation the monitor performs on it.
//!
//! Only unchecked items (`- [ ] `) are tracked. The task id is the first match
//! of a configurable pattern in the item text; items without a match are ignored.

use anyhow::{Context, Result};
use regex::Regex;

pub const UNCHECKED_PREFIX: &str = "- [ ] ";
pub const CHECKED_PREFIX: &str = "- [x] ";

/// Default task id grammar: `task-<yyyymmdd>-<hhmmss>-<slug>`.
pub const DEFAULT_TASK_ID_PATTERN: &str = r"task-\d{8}-\d{6}-[a-z0-9][a-z0-9-]{1,48}[a-z0-9]";

/// Compiled task id grammar.
#[derive(Debug, Clone)]
pub struct TaskIdPattern {
    regex: Regex,
}

impl TaskIdPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex =
            Regex::new(pattern).with_context(|| format!("compile task id pattern {pattern:?}"))?;
        Ok(Self { regex })
    }

    /// First task id found in `text`, if any.
    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex.find(text).map(|m| m.as_str())
    }
}

impl Default for TaskIdPattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_TASK_ID_PATTERN).expect("default task id pattern compiles"),
        }
    }
}

/// An unchecked checklist item that names a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoEntry {
    pub task_id: String,
    /// Full text after the unchecked prefix.
    pub text: String,
}

/// Unchecked entries in declaration order.
pub fn parse_todo_entries(contents: &str, pattern: &TaskIdPattern) -> Vec<TodoEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let text = line
                .trim_start_matches([' ', '\t'])
                .strip_prefix(UNCHECKED_PREFIX)?;
            let task_id = pattern.find(text)?;
            Some(TodoEntry {
                task_id: task_id.to_string(),
                text: text.to_string(),
            })
        })
        .collect()
}

/// Check the first unchecked line that mentions `task_id`.
///
/// Returns `None` when no such line exists.
pub fn mark_task_checked(contents: &str, task_id: &str) -> Option<String> {
    let mut lines: Vec<String> = contents.split('\n').map(str::to_string).collect();
    let line = lines
        .iter_mut()
        .find(|line| line.contains(task_id) && line.contains(UNCHECKED_PREFIX))?;
    *line = line.replacen(UNCHECKED_PREFIX, CHECKED_PREFIX, 1);
    Some(lines.join("\n"))
}
