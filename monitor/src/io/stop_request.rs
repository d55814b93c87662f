//! Stop-suppression markers.
//!
//! A marker holds either `permanent` or the RFC3339 time the stop was
//! requested. Expired and corrupt markers are removed by the check that finds
//! them, so suppression never outlives its window and never sticks on garbage.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::io::markers::{Marker, MarkerStore};

pub const PERMANENT: &str = "permanent";
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Parsed marker contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    Permanent,
    At(DateTime<Utc>),
    Corrupt,
}

impl StopRequest {
    pub fn parse(contents: &str) -> Self {
        let trimmed = contents.trim();
        if trimmed == PERMANENT {
            return StopRequest::Permanent;
        }
        match DateTime::parse_from_rfc3339(trimmed) {
            Ok(at) => StopRequest::At(at.with_timezone(&Utc)),
            Err(_) => StopRequest::Corrupt,
        }
    }

    /// Whether the request is in effect at `now`. `[at, at + window)` suppresses.
    pub fn is_active(self, window: Duration, now: DateTime<Utc>) -> bool {
        match self {
            StopRequest::Permanent => true,
            StopRequest::At(at) => match (now - at).to_std() {
                Ok(age) => age < window,
                // Requested "in the future": clock skew, age counts as zero.
                Err(_) => !window.is_zero(),
            },
            StopRequest::Corrupt => false,
        }
    }
}

/// Stop-suppression operations over a marker store.
pub struct StopRequests<'a, S: MarkerStore> {
    store: &'a S,
}

impl<'a, S: MarkerStore> StopRequests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Record a user stop: `permanent` or the current time.
    pub fn write(&self, task_id: &str, permanent: bool, now: DateTime<Utc>) -> Result<()> {
        let contents = if permanent {
            PERMANENT.to_string()
        } else {
            now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        };
        self.store
            .write(task_id, Marker::StopRequested, &format!("{contents}\n"))
            .context("write stop-request marker")
    }

    /// Whether a stop request suppresses restarts. Expired or corrupt markers
    /// are deleted and reported as not suppressed.
    pub fn check(&self, task_id: &str, window: Duration, now: DateTime<Utc>) -> bool {
        let contents = match self.store.read(task_id, Marker::StopRequested) {
            Ok(Some(contents)) => contents,
            Ok(None) => return false,
            Err(err) => {
                warn!(task_id, err = %err, "unreadable stop-request marker, not suppressing");
                return false;
            }
        };
        let request = StopRequest::parse(&contents);
        if request.is_active(window, now) {
            return true;
        }
        debug!(task_id, ?request, "clearing inactive stop-request marker");
        if let Err(err) = self.store.remove(task_id, Marker::StopRequested) {
            warn!(task_id, err = %err, "failed to clear stop-request marker");
        }
        false
    }

    /// Like [`check`](Self::check) but never deletes anything.
    pub fn peek(&self, task_id: &str, window: Duration, now: DateTime<Utc>) -> bool {
        match self.store.read(task_id, Marker::StopRequested) {
            Ok(Some(contents)) => StopRequest::parse(&contents).is_active(window, now),
            _ => false,
        }
    }

    pub fn remove(&self, task_id: &str) -> Result<()> {
        self.store
            .remove(task_id, Marker::StopRequested)
            .context("remove stop-request marker")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::io::layout::ScopePaths;
    use crate::io::markers::FsMarkerStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    fn store() -> (tempfile::TempDir, FsMarkerStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsMarkerStore::new(ScopePaths::new(temp.path(), "p"));
        (temp, store)
    }

    #[test]
    fn absent_marker_does_not_suppress() {
        let (_temp, store) = store();
        assert!(!StopRequests::new(&store).check("t", DEFAULT_WINDOW, t0()));
    }

    #[test]
    fn suppresses_exactly_within_window_then_expires() {
        let (_temp, store) = store();
        let stops = StopRequests::new(&store);
        let window = Duration::from_secs(60);
        stops.write("t", false, t0()).expect("write");
        assert_eq!(
            store.read("t", Marker::StopRequested).expect("read"),
            Some("2026-03-01T12:00:00Z\n".to_string())
        );

        assert!(stops.check("t", window, t0()));
        assert!(stops.check("t", window, t0() + chrono::Duration::seconds(59)));
        assert!(store.exists("t", Marker::StopRequested));

        assert!(!stops.check("t", window, t0() + chrono::Duration::seconds(60)));
        assert!(!store.exists("t", Marker::StopRequested));
        assert!(!stops.check("t", window, t0()));
    }

    #[test]
    fn permanent_ignores_window() {
        let (_temp, store) = store();
        let stops = StopRequests::new(&store);
        stops.write("t", true, t0()).expect("write");
        let later = t0() + chrono::Duration::days(365);
        assert!(stops.check("t", Duration::from_nanos(1), later));
        assert!(store.exists("t", Marker::StopRequested));
    }

    #[test]
    fn corrupt_marker_is_removed() {
        let (_temp, store) = store();
        store
            .write("t", Marker::StopRequested, "yesterday-ish\n")
            .expect("write");
        let stops = StopRequests::new(&store);
        assert!(!stops.check("t", DEFAULT_WINDOW, t0()));
        assert!(!store.exists("t", Marker::StopRequested));
    }

    #[test]
    fn peek_never_deletes() {
        let (_temp, store) = store();
        let stops = StopRequests::new(&store);
        stops.write("t", false, t0()).expect("write");
        let later = t0() + chrono::Duration::hours(1);
        assert!(!stops.peek("t", DEFAULT_WINDOW, later));
        assert!(store.exists("t", Marker::StopRequested));
    }

    #[test]
    fn remove_is_idempotent() {
        let (_temp, store) = store();
        let stops = StopRequests::new(&store);
        stops.remove("t").expect("remove absent");
        stops.write("t", true, t0()).expect("write");
        stops.remove("t").expect("remove");
        assert!(!store.exists("t", Marker::StopRequested));
    }
}
