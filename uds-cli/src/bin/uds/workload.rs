/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The lock/unlock/spin/lock/unlock unit of work shared by the subcommands.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use tracing::debug;
use uds::DetLock;
use uds::Scheduler;

/// Units that take a deterministic lock, spin, and take it again.
#[derive(Debug, Clone)]
pub struct LockWorkload {
    /// Units to submit; rounded up to fill every round.
    pub units: usize,
    /// Critical sections per unit.
    pub critical_sections: usize,
    /// Busy-waiting between two critical sections.
    pub load: Duration,
}

/// Occupy the CPU for `d`.
pub fn spin_for(d: Duration) {
    let start = Instant::now();
    while start.elapsed() < d {
        std::hint::spin_loop();
    }
}

impl LockWorkload {
    /// Units actually submitted for rounds of `primaries`, so that no round waits forever
    /// for missing threads.
    pub fn padded_units(&self, primaries: usize) -> usize {
        self.units.div_ceil(primaries) * primaries
    }

    /// Run the workload to completion and return how long it took.  Rounds are expected to
    /// have `primaries` primaries by the time the first unit runs.
    pub fn run(&self, sched: &Arc<Scheduler>, primaries: usize) -> anyhow::Result<Duration> {
        let lock = Arc::new(DetLock::new(sched));
        let units = self.padded_units(primaries);
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();

        for _ in 0..units {
            let (lock, tx, this) = (lock.clone(), tx.clone(), self.clone());
            sched.submit(
                move |me| {
                    let mut res = Ok(());
                    for ix in 0..this.critical_sections {
                        if ix > 0 {
                            spin_for(this.load);
                        }
                        res = lock.with(me, || ());
                        if res.is_err() {
                            break;
                        }
                    }
                    // The receiver only goes away if the run was already abandoned.
                    let _ = tx.send(res);
                },
                || {},
            )?;
        }
        drop(tx);
        debug!("submitted {} units", units);

        for _ in 0..units {
            rx.recv()
                .context("a unit of work died before reporting")?
                .context("a unit of work broke the lock protocol")?;
        }
        wait_quiescent(sched);
        Ok(start.elapsed())
    }
}

/// Wait until every logical thread of `sched` has terminated.
pub fn wait_quiescent(sched: &Scheduler) {
    while sched.threads_terminated_total() < sched.threads_scheduled_total() {
        thread::sleep(Duration::from_millis(5));
    }
}
