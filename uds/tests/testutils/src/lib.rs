/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Testing utilities.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use pretty_assertions::assert_eq;
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use tracing_subscriber::EnvFilter;
use uds::Config;
use uds::DetLock;
use uds::Scheduler;
use uds::Slot;
use uds::ThreadId;

/// How many runs for each test when confirming determinism.
pub static TEST_REPS: u64 = 3;

/// Upper bound for any single wait on a worker.  Nothing in a passing test comes close.
pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Install a stderr subscriber for the whole test binary, filtered by `UDS_TEST_LOG`
/// (default `uds=info`).  Idempotent.
pub fn init_test_tracing() {
    let filter = std::env::var("UDS_TEST_LOG").unwrap_or_else(|_| "uds=info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// A one-shot barrier: closed until opened, then open forever.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Gate> {
        Arc::new(Gate::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let guard = self.open.lock().unwrap();
        let _guard = self.cond.wait_while(guard, |open| !*open).unwrap();
    }
}

/// Random sleeps that perturb the OS scheduler without affecting the logical schedule.
#[derive(Debug)]
pub struct Jitter {
    rng: Mutex<Pcg64>,
    max_micros: u64,
}

impl Jitter {
    pub fn new(seed: u64, max_micros: u64) -> Arc<Jitter> {
        Arc::new(Jitter {
            rng: Mutex::new(Pcg64::seed_from_u64(seed)),
            max_micros,
        })
    }

    pub fn pause(&self) {
        let micros = self.rng.lock().unwrap().gen_range(0..=self.max_micros);
        thread::sleep(Duration::from_micros(micros));
    }
}

/// Receive exactly `n` messages, panicking if any of them takes longer than [`TIMEOUT`].
pub fn collect<T>(rx: &Receiver<T>, n: usize) -> Vec<T> {
    (0..n)
        .map(|ix| {
            rx.recv_timeout(TIMEOUT)
                .unwrap_or_else(|e| panic!("message {} of {} never arrived: {}", ix + 1, n, e))
        })
        .collect()
}

/// Poll `cond` until it holds, panicking after [`TIMEOUT`].
pub fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > TIMEOUT {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Block until every admitted logical thread has terminated.
pub fn wait_quiescent(sched: &Scheduler) {
    eventually("all logical threads to terminate", || {
        sched.threads_terminated_total() == sched.threads_scheduled_total()
    });
}

/// Everything about a run that must be identical across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetOutcome {
    /// Whatever the workload chose to report, e.g. the order of critical sections.
    pub output: Vec<String>,
    pub turns: Vec<(u64, ThreadId, Slot)>,
    pub round_starts: Vec<(u64, Vec<ThreadId>, Vec<Slot>)>,
    /// Grant order, one entry per lock.
    pub lock_grants: Vec<Vec<ThreadId>>,
}

/// The resources handed to one run of a workload.
pub struct Run {
    pub sched: Arc<Scheduler>,
    pub locks: Vec<Arc<DetLock>>,
    pub jitter: Arc<Jitter>,
}

/// Runs a workload [`TEST_REPS`] times, each on a fresh recording scheduler with
/// differently seeded jitter, and checks that every run produces the same outcome.
///
/// The workload must return only once all of its units completed, and must submit
/// enough units to fill every round it starts.
pub fn det_test_fn_with_config<F>(config: Config, num_locks: usize, workload: F) -> DetOutcome
where
    F: Fn(&Run) -> Vec<String>,
{
    init_test_tracing();
    let config = Config {
        record_schedule: true,
        ..config
    };
    let mut last: Option<DetOutcome> = None;
    for rep in 0..TEST_REPS {
        println!("Test Run {}:", rep + 1);
        let sched = Scheduler::new(config.clone()).unwrap();
        let locks = (0..num_locks)
            .map(|_| Arc::new(DetLock::new(&sched)))
            .collect::<Vec<_>>();
        let run = Run {
            sched: sched.clone(),
            locks,
            jitter: Jitter::new(rep, 200),
        };
        let output = workload(&run);
        wait_quiescent(&sched);

        let trace = sched.schedule_trace().unwrap();
        let outcome = DetOutcome {
            output,
            turns: trace.turns(),
            round_starts: trace.round_starts(),
            lock_grants: run.locks.iter().map(|l| trace.lock_grants(l.id())).collect(),
        };
        println!("({} turns over {} rounds.)", outcome.turns.len(), outcome.round_starts.len());
        if let Some(prev) = &last {
            assert_eq!(
                prev, &outcome,
                "\n  Consecutive runs of test had different schedules"
            );
        }
        last = Some(outcome);
    }
    last.unwrap()
}

/// Like [`det_test_fn_with_config`], with the default configuration.
pub fn det_test_fn<F>(num_locks: usize, workload: F) -> DetOutcome
where
    F: Fn(&Run) -> Vec<String>,
{
    det_test_fn_with_config(Config::default(), num_locks, workload)
}
