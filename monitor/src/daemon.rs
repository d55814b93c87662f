//! Single-pass and daemon invocation of the poll cycle.
//!
//! Only daemon mode takes the scope lock. A single pass waits for every launch
//! it dispatched; the daemon reaps finished launches at the top of each tick.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::io::launcher::Launcher;
use crate::io::liveness::{Liveness, Signaller};
use crate::io::lock::MonitorLock;
use crate::io::markers::MarkerStore;
use crate::pass::{LaunchGroup, Monitor, PassEvent};

#[derive(Debug, Clone, Copy)]
pub struct DaemonOptions {
    /// Time between ticks. Zero means a single pass.
    pub interval: Duration,
    /// Run one pass and return.
    pub once: bool,
    /// Stop after this many ticks. `None` loops until the process ends.
    pub max_passes: Option<u32>,
}

impl DaemonOptions {
    pub fn is_single_pass(&self) -> bool {
        self.once || self.interval.is_zero()
    }
}

/// Run the monitor according to `opts`, reporting through `on_event`.
pub fn run_monitor<L, P, S, F>(
    monitor: &Monitor<'_, L, P, S>,
    opts: &DaemonOptions,
    mut on_event: F,
) -> Result<()>
where
    L: Launcher + 'static,
    P: Liveness + Signaller,
    S: MarkerStore,
    F: FnMut(&PassEvent),
{
    if opts.is_single_pass() {
        let mut launches = LaunchGroup::new();
        let result = monitor.run_pass(Utc::now(), &mut launches, &mut on_event);
        wait_for_launches(&mut launches, &mut on_event);
        return result.map(|_| ());
    }

    let lock = MonitorLock::acquire(&monitor.scope, monitor.procs)?;
    info!(
        lockfile = %lock.path().display(),
        interval_secs = opts.interval.as_secs(),
        "monitor daemon started"
    );

    let mut launches = LaunchGroup::new();
    let mut passes = 0u32;
    loop {
        for event in launches.reap_finished() {
            on_event(&event);
        }
        debug!(pending = launches.len(), "tick");
        // A failed pass is reported and retried on the next tick.
        if let Err(err) = monitor.run_pass(Utc::now(), &mut launches, &mut on_event) {
            warn!(err = %err, "monitor pass failed");
            on_event(&PassEvent::Error {
                message: format!("{err:#}"),
            });
        }
        passes += 1;
        if opts.max_passes.is_some_and(|max| passes >= max) {
            break;
        }
        thread::sleep(opts.interval);
    }

    wait_for_launches(&mut launches, &mut on_event);
    lock.release()
}

fn wait_for_launches<F: FnMut(&PassEvent)>(launches: &mut LaunchGroup, on_event: &mut F) {
    if launches.is_empty() {
        return;
    }
    info!(pending = launches.len(), "waiting for launches to finish");
    for event in launches.join_all() {
        on_event(&event);
    }
}
