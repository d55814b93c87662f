//! Process liveness queries and process-group signalling.
//!
//! Both are traits so assessment and termination can be driven by scripted
//! fakes in tests. [`SystemProcesses`] is the real implementation.

use anyhow::Result;
use thiserror::Error;

use crate::io::run_info::RunInfo;

/// The process group was gone by the time a signal was sent.
#[derive(Debug, Error)]
#[error("process group {pgid} not found")]
pub struct NoSuchGroupError {
    pub pgid: i32,
}

/// Reports whether recorded processes still exist.
pub trait Liveness {
    fn is_alive(&self, pid: i32) -> bool;
    fn is_group_alive(&self, pgid: i32) -> Result<bool>;
}

/// Delivers termination signals to a process group.
pub trait Signaller {
    /// Graceful termination (SIGTERM). A group that no longer exists is
    /// reported as [`NoSuchGroupError`].
    fn terminate_group(&self, pgid: i32) -> Result<()>;
    /// Forceful termination (SIGKILL).
    fn kill_group(&self, pgid: i32) -> Result<()>;
}

/// A run is alive when its pid is alive or, failing that, its process group is.
/// Group query errors count as dead.
pub fn is_run_alive<L: Liveness + ?Sized>(liveness: &L, info: &RunInfo) -> bool {
    if info.pid > 0 && liveness.is_alive(info.pid) {
        return true;
    }
    info.pgid > 0 && liveness.is_group_alive(info.pgid).unwrap_or(false)
}

/// Liveness and signalling against the host OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

#[cfg(unix)]
mod unix {
    use anyhow::{Context, Result, anyhow};
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    use super::{Liveness, NoSuchGroupError, Signaller, SystemProcesses};

    impl Liveness for SystemProcesses {
        fn is_alive(&self, pid: i32) -> bool {
            if pid <= 0 {
                return false;
            }
            // EPERM: the process exists but belongs to someone else.
            matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
        }

        fn is_group_alive(&self, pgid: i32) -> Result<bool> {
            if pgid <= 0 {
                return Err(anyhow!("invalid process group id {pgid}"));
            }
            match killpg(Pid::from_raw(pgid), None) {
                Ok(()) | Err(Errno::EPERM) => Ok(true),
                Err(Errno::ESRCH) => Ok(false),
                Err(err) => Err(err).with_context(|| format!("probe process group {pgid}")),
            }
        }
    }

    impl Signaller for SystemProcesses {
        fn terminate_group(&self, pgid: i32) -> Result<()> {
            signal_group(pgid, Signal::SIGTERM)
        }

        fn kill_group(&self, pgid: i32) -> Result<()> {
            signal_group(pgid, Signal::SIGKILL)
        }
    }

    fn signal_group(pgid: i32, signal: Signal) -> Result<()> {
        if pgid <= 0 {
            return Err(anyhow!("invalid process group id {pgid}"));
        }
        match killpg(Pid::from_raw(pgid), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(NoSuchGroupError { pgid }.into()),
            Err(err) => Err(err).with_context(|| format!("send {signal:?} to process group {pgid}")),
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use anyhow::{Result, anyhow};

    use super::{Liveness, Signaller, SystemProcesses};

    impl Liveness for SystemProcesses {
        fn is_alive(&self, _pid: i32) -> bool {
            false
        }

        fn is_group_alive(&self, _pgid: i32) -> Result<bool> {
            Err(anyhow!("process group probing is only supported on unix"))
        }
    }

    impl Signaller for SystemProcesses {
        fn terminate_group(&self, _pgid: i32) -> Result<()> {
            Err(anyhow!("process group signalling is only supported on unix"))
        }

        fn kill_group(&self, _pgid: i32) -> Result<()> {
            Err(anyhow!("process group signalling is only supported on unix"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProcesses;

    #[test]
    fn run_alive_by_pid_or_group() {
        let procs = FakeProcesses::new();
        let info = RunInfo {
            pid: 100,
            pgid: 200,
            ..RunInfo::default()
        };
        assert!(!is_run_alive(&procs, &info));

        procs.set_alive(200, true);
        assert!(is_run_alive(&procs, &info));

        procs.set_alive(200, false);
        procs.set_alive(100, true);
        assert!(is_run_alive(&procs, &info));
    }

    #[test]
    fn group_probe_errors_count_as_dead() {
        let procs = FakeProcesses::new();
        procs.fail_group_probe(200);
        let info = RunInfo {
            pid: 0,
            pgid: 200,
            ..RunInfo::default()
        };
        assert!(!is_run_alive(&procs, &info));
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        let pid = i32::try_from(std::process::id()).expect("pid fits");
        assert!(SystemProcesses.is_alive(pid));
        assert!(!SystemProcesses.is_alive(0));
        assert!(!SystemProcesses.is_alive(-5));
    }
}
