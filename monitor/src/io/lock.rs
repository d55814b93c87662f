//! Singleton ownership of a `(root, project)` scope.
//!
//! The lock file holds the owner's pid. A lock whose owner is dead, or whose
//! content is not a pid, is reclaimed silently. Release only deletes the file
//! while it still names the holder.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::layout::ScopePaths;
use crate::io::liveness::Liveness;

/// Another live monitor owns the scope.
#[derive(Debug, Error)]
#[error(
    "monitor already running for project {project:?} (pid {pid}); lockfile: {lockfile}\n\
     if the process is stale, remove the lockfile manually: rm {lockfile}"
)]
pub struct LockHeldError {
    pub project: String,
    pub pid: i32,
    pub lockfile: String,
}

/// The lock changed hands between our write and our read-back.
#[derive(Debug, Error)]
#[error("monitor lock race: another process took {lockfile} (now pid {found:?})")]
pub struct LockRaceError {
    pub lockfile: String,
    pub found: Option<i32>,
}

/// Held scope lock. Dropping it releases the lock if still owned.
#[derive(Debug)]
pub struct MonitorLock {
    path: PathBuf,
    pid: i32,
    released: bool,
}

impl MonitorLock {
    /// Acquire the scope lock for the current process.
    pub fn acquire<L: Liveness>(scope: &ScopePaths, liveness: &L) -> Result<Self> {
        let pid = i32::try_from(std::process::id()).context("current pid out of range")?;
        Self::acquire_as(scope, pid, liveness)
    }

    /// Acquire the scope lock on behalf of `pid`.
    #[instrument(skip_all, fields(project = %scope.project_id, pid = pid))]
    pub fn acquire_as<L: Liveness>(scope: &ScopePaths, pid: i32, liveness: &L) -> Result<Self> {
        let path = scope.lock_path.clone();
        fs::create_dir_all(&scope.project_dir).with_context(|| {
            format!(
                "create monitor lock directory {}",
                scope.project_dir.display()
            )
        })?;

        match read_owner(&path)? {
            LockContent::Missing => {}
            LockContent::Owner(owner) if owner > 0 && liveness.is_alive(owner) => {
                return Err(LockHeldError {
                    project: scope.project_id.clone(),
                    pid: owner,
                    lockfile: path.display().to_string(),
                }
                .into());
            }
            LockContent::Owner(owner) => {
                info!(owner, path = %path.display(), "reclaiming stale monitor lock");
                remove_if_present(&path)?;
            }
            LockContent::Corrupt => {
                warn!(path = %path.display(), "removing corrupt monitor lock");
                remove_if_present(&path)?;
            }
        }

        let tmp_path = path.with_extension("pid.tmp");
        fs::write(&tmp_path, format!("{pid}\n"))
            .with_context(|| format!("write monitor lockfile {}", tmp_path.display()))?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err)
                .with_context(|| format!("install monitor lockfile {}", path.display()));
        }

        verify_owner(&path, pid)?;

        debug!(path = %path.display(), "monitor lock acquired");
        Ok(Self {
            path,
            pid,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file if it still names this holder.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match read_owner(&self.path)? {
            LockContent::Owner(found) if found == self.pid => {
                remove_if_present(&self.path)?;
                debug!(path = %self.path.display(), "monitor lock released");
            }
            other => {
                warn!(path = %self.path.display(), ?other, "monitor lock no longer ours, leaving it");
            }
        }
        Ok(())
    }
}

impl Drop for MonitorLock {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            warn!(err = %err, "failed to release monitor lock");
        }
    }
}

/// Read the lock back and confirm `pid` owns it.
fn verify_owner(path: &Path, pid: i32) -> Result<()> {
    let found = match read_owner(path)? {
        LockContent::Owner(found) if found == pid => return Ok(()),
        LockContent::Owner(found) => Some(found),
        LockContent::Missing | LockContent::Corrupt => None,
    };
    Err(LockRaceError {
        lockfile: path.display().to_string(),
        found,
    }
    .into())
}

#[derive(Debug)]
enum LockContent {
    Missing,
    Owner(i32),
    Corrupt,
}

fn read_owner(path: &Path) -> Result<LockContent> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .trim()
            .parse::<i32>()
            .map_or(LockContent::Corrupt, LockContent::Owner)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(LockContent::Missing),
        Err(err) => Err(err).with_context(|| format!("read monitor lockfile {}", path.display())),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove monitor lockfile {}", path.display())),
    }
}
