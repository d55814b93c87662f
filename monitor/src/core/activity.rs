//! Pure drift evaluation over already-collected activity evidence.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::types::RunStatus;

/// Message types that count as substantive progress.
pub const MEANINGFUL_MESSAGE_TYPES: [&str; 4] = ["FACT", "DECISION", "ERROR", "REVIEW"];

pub fn is_meaningful_type(kind: &str) -> bool {
    let kind = kind.trim();
    MEANINGFUL_MESSAGE_TYPES
        .iter()
        .any(|meaningful| meaningful.eq_ignore_ascii_case(kind))
}

/// Evidence the drift verdict is computed from.
#[derive(Debug, Clone)]
pub struct DriftInputs<'a> {
    pub status: &'a RunStatus,
    pub last_meaningful_at: Option<DateTime<Utc>>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub threshold: Duration,
    pub now: DateTime<Utc>,
    /// Message log read failure, folded into the reason.
    pub read_error: Option<&'a str>,
}

/// Returns `(drift_risk, reason)`.
pub fn evaluate_drift(inputs: &DriftInputs<'_>) -> (bool, String) {
    if *inputs.status != RunStatus::Running {
        return (false, annotate("task is not running".to_string(), inputs.read_error));
    }

    let (risk, reason) = if let Some(at) = inputs.last_meaningful_at {
        let age = safe_age(inputs.now, at);
        if age > inputs.threshold {
            (
                true,
                format!("no meaningful bus signal for {}", format_age(age)),
            )
        } else {
            (
                false,
                format!("last meaningful bus signal {} ago", format_age(age)),
            )
        }
    } else if let Some(started) = inputs.run_started_at {
        let age = safe_age(inputs.now, started);
        if age > inputs.threshold {
            (
                true,
                format!(
                    "running for {} without meaningful bus signal",
                    format_age(age)
                ),
            )
        } else {
            (
                false,
                format!(
                    "no meaningful bus signal yet (running for {})",
                    format_age(age)
                ),
            )
        }
    } else {
        (false, "running with no meaningful bus signal".to_string())
    };

    (risk, annotate(reason, inputs.read_error))
}

fn annotate(reason: String, read_error: Option<&str>) -> String {
    match read_error {
        Some(err) => format!("{reason} (message bus read failed: {err})"),
        None => reason,
    }
}

/// Elapsed time from `then` to `now`, clamped to zero on clock skew.
pub fn safe_age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// Render a duration rounded to whole seconds, e.g. `1h2m3s`, `35m0s`, `4s`.
pub fn format_age(age: Duration) -> String {
    let total = age.as_secs() + u64::from(age.subsec_millis() >= 500);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Collapse whitespace runs to single spaces and cap at `max_chars` characters,
/// ending with `...` when truncated.
pub fn compact_body_preview(body: &str, max_chars: usize) -> String {
    let compact = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.is_empty() || max_chars == 0 {
        return compact;
    }
    if compact.chars().count() <= max_chars {
        return compact;
    }
    if max_chars <= 3 {
        return compact.chars().take(max_chars).collect();
    }
    let mut preview: String = compact.chars().take(max_chars - 3).collect();
    preview.push_str("...");
    preview
}
