//! Read-only access to a task's message log (`TASK-MESSAGE-BUS.md`).
//!
//! Entries are framed by `---` lines: a header block of `key: value` lines
//! (`msg_id`, `ts`, `type`, ...) followed by a body that runs until the next
//! `---`. Legacy single-line entries (`[YYYY-MM-DD HH:MM:SS] TYPE: body`) that
//! appear outside any frame are accepted too; without a type token they read as
//! `INFO`. Malformed entries are skipped.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

static LEGACY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\](.*)$").expect("legacy line pattern compiles")
});

static LEGACY_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_/-]+$").expect("legacy type pattern compiles")
});

/// Type given to legacy lines that carry no `TYPE:` token.
pub const LEGACY_DEFAULT_TYPE: &str = "INFO";

/// One message-log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub msg_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: String,
    pub body: String,
}

/// Read all messages. A missing log is an empty log.
pub fn read_messages(path: &Path) -> Result<Vec<BusMessage>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read message bus {}", path.display()));
        }
    };
    let messages = parse_messages(&contents);
    debug!(path = %path.display(), count = messages.len(), "message bus read");
    Ok(messages)
}

enum State {
    SeekHeader,
    Header,
    Body,
}

pub fn parse_messages(contents: &str) -> Vec<BusMessage> {
    let mut messages = Vec::new();
    let mut state = State::SeekHeader;
    let mut header: Vec<&str> = Vec::new();
    let mut body = String::new();
    let mut current: Option<BusMessage> = None;

    for line in contents.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        match state {
            State::SeekHeader => {
                if trimmed == "---" {
                    header.clear();
                    state = State::Header;
                } else if let Some(msg) = parse_legacy_line(trimmed) {
                    messages.push(msg);
                }
            }
            State::Header => {
                if trimmed == "---" {
                    current = Some(parse_header(&header));
                    header.clear();
                    body.clear();
                    state = State::Body;
                } else {
                    header.push(trimmed);
                }
            }
            State::Body => {
                if trimmed == "---" {
                    if let Some(mut msg) = current.take() {
                        msg.body = finalize_body(&body);
                        messages.push(msg);
                    }
                    header.clear();
                    state = State::Header;
                } else {
                    body.push_str(line);
                }
            }
        }
    }

    // A trailing body only counts once its last line is complete.
    if let (State::Body, Some(mut msg)) = (state, current) {
        if body.ends_with('\n') {
            msg.body = finalize_body(&body);
            messages.push(msg);
        }
    }
    messages
}

fn parse_header(lines: &[&str]) -> BusMessage {
    let mut msg = BusMessage {
        msg_id: String::new(),
        timestamp: None,
        kind: String::new(),
        body: String::new(),
    };
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches(['"', '\'']);
        match key.trim() {
            "msg_id" => msg.msg_id = value.to_string(),
            "ts" => msg.timestamp = parse_timestamp(value),
            "type" => msg.kind = value.to_string(),
            _ => {}
        }
    }
    msg
}

fn parse_legacy_line(line: &str) -> Option<BusMessage> {
    let caps = LEGACY_LINE.captures(line.trim())?;
    let timestamp = parse_timestamp(caps.get(1)?.as_str())?;
    let content = caps.get(2)?.as_str().trim();
    if content.is_empty() {
        return None;
    }

    let mut kind = LEGACY_DEFAULT_TYPE.to_string();
    let mut body = content;
    if let Some((token, rest)) = content.split_once(':') {
        let token = token.trim();
        if LEGACY_TYPE.is_match(token) {
            kind = token.to_uppercase();
            body = rest.trim();
        }
    }
    if body.is_empty() {
        body = content;
    }
    Some(BusMessage {
        msg_id: String::new(),
        timestamp: Some(timestamp),
        kind,
        body: body.to_string(),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .map(|naive| naive.and_utc())
}

fn finalize_body(body: &str) -> String {
    body.trim_end_matches(['\r', '\n']).to_string()
}
