//! Per-task presence markers.
//!
//! The [`MarkerStore`] trait is the only way the monitor touches `DONE` and
//! `STOP-REQUESTED`, so a different backing store can replace the filesystem
//! without changing assessment or decision logic.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::io::layout::{DONE_FILE, STOP_REQUESTED_FILE, ScopePaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Task has been finalized.
    Done,
    /// A user asked the task to stop.
    StopRequested,
}

impl Marker {
    fn file_name(self) -> &'static str {
        match self {
            Marker::Done => DONE_FILE,
            Marker::StopRequested => STOP_REQUESTED_FILE,
        }
    }
}

pub trait MarkerStore {
    fn exists(&self, task_id: &str, marker: Marker) -> bool;
    /// `None` when the marker is absent.
    fn read(&self, task_id: &str, marker: Marker) -> Result<Option<String>>;
    /// Create or replace the marker.
    fn write(&self, task_id: &str, marker: Marker, contents: &str) -> Result<()>;
    /// Remove the marker. Absence is not an error.
    fn remove(&self, task_id: &str, marker: Marker) -> Result<()>;
}

/// Markers as files inside each task directory.
#[derive(Debug, Clone)]
pub struct FsMarkerStore {
    scope: ScopePaths,
}

impl FsMarkerStore {
    pub fn new(scope: ScopePaths) -> Self {
        Self { scope }
    }

    fn path(&self, task_id: &str, marker: Marker) -> PathBuf {
        self.scope.task(task_id).task_dir.join(marker.file_name())
    }
}

impl MarkerStore for FsMarkerStore {
    fn exists(&self, task_id: &str, marker: Marker) -> bool {
        self.path(task_id, marker).is_file()
    }

    fn read(&self, task_id: &str, marker: Marker) -> Result<Option<String>> {
        let path = self.path(task_id, marker);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read marker {}", path.display())),
        }
    }

    fn write(&self, task_id: &str, marker: Marker, contents: &str) -> Result<()> {
        let path = self.path(task_id, marker);
        let parent = path
            .parent()
            .with_context(|| format!("marker path missing parent {}", path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create task directory {}", parent.display()))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .with_context(|| format!("write temp marker {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace marker {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, task_id: &str, marker: Marker) -> Result<()> {
        let path = self.path(task_id, marker);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove marker {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove_cycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scope = ScopePaths::new(temp.path(), "p");
        let store = FsMarkerStore::new(scope.clone());

        assert!(!store.exists("t", Marker::Done));
        assert_eq!(store.read("t", Marker::Done).expect("read"), None);

        store.write("t", Marker::Done, "").expect("write");
        assert!(store.exists("t", Marker::Done));
        assert!(scope.task("t").done_path.is_file());
        assert_eq!(
            store.read("t", Marker::Done).expect("read"),
            Some(String::new())
        );
        assert!(!store.exists("t", Marker::StopRequested));

        store.remove("t", Marker::Done).expect("remove");
        store.remove("t", Marker::Done).expect("remove again");
        assert!(!store.exists("t", Marker::Done));
    }
}
