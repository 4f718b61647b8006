/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Deterministic user-level scheduling algorithm.
//!
//! Logical threads run on real OS threads, but every ordering-sensitive step passes
//! through [`Scheduler::wait_for_turn_locked`].  Rounds are formed from the front of the
//! creation-ordered thread list; within a round the live total order alone decides which
//! primary may pass its next checkpoint.  A round closes once no primary can make progress
//! (each one is terminated, queued on a lock, out of steps, or waiting for its turn), and
//! the next round is filled within the same critical section.
//!
//! All of the state lives behind one mutex.  There is no other lock in this crate, so
//! there is no lock ordering to get wrong.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fmt::Write;
use std::mem;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;

use tracing::debug;
use tracing::enabled;
use tracing::info;
use tracing::trace;
use tracing::warn;
use tracing::Level;
use uds_model::Config;
use uds_model::LockId;
use uds_model::SchedEvent;
use uds_model::ScheduleTrace;
use uds_model::SchedulerSummary;
use uds_model::ThreadId;

use crate::detlog;
use crate::detlog_debug;
use crate::error::Error;
use crate::lock::LockState;
use crate::monitor::lock_recovering;
use crate::monitor::wait_until;
use crate::round::RoundConfig;
use crate::round::Slot;
use crate::thread::TerminateOnDrop;
use crate::thread::ThreadHandle;
use crate::thread::ThreadRecord;

/// Decides whether a listed, non-terminated thread may be selected as a primary.  The
/// default admits every thread; a policy that rejects a thread forever stalls the round
/// formation once the list runs out.
pub type EligibilityFn = dyn Fn(ThreadId) -> bool + Send + Sync;

/// Guard over the coordination state.
pub(crate) type StateGuard<'a> = MutexGuard<'a, SchedState>;

/// Everything the coordination mutex protects.
#[derive(Debug)]
pub(crate) struct SchedState {
    /// Monotonically counts rounds; zero until the first round is bootstrapped.
    round: u64,

    next_tid: ThreadId,
    next_lock: LockId,

    /// Logical threads in creation order, from admission until pruned after termination.
    thread_list: Vec<ThreadId>,

    /// Records of listed threads and of submitters waiting for admission.
    ///
    /// (N.B. BTreeMap for a predictable order when printing.)
    records: BTreeMap<ThreadId, ThreadRecord>,

    /// The current round's primaries, indexed by slot.  Membership only changes at round
    /// boundaries.
    primaries: Vec<ThreadId>,

    /// Authoritative for the round in progress; consumed as turns are taken.
    live: RoundConfig,

    /// Written by reconfiguration requests; copied to `live` at round start.
    staged: RoundConfig,

    /// Submitters blocked by backpressure, admitted in FIFO order.
    admission_queue: VecDeque<ThreadId>,

    locks: BTreeMap<LockId, LockState>,

    threads_scheduled: u64,
    threads_terminated: u64,

    /// Only present if `Config::record_schedule` is set.
    trace: Option<ScheduleTrace>,
}

impl SchedState {
    pub(crate) fn round(&self) -> u64 {
        self.round
    }

    pub(crate) fn thread_opt(&self, tid: ThreadId) -> Option<&ThreadRecord> {
        self.records.get(&tid)
    }

    pub(crate) fn thread(&self, tid: ThreadId) -> &ThreadRecord {
        self.records
            .get(&tid)
            .unwrap_or_else(|| panic!("Internal failure: {} has no thread record", tid))
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> &mut ThreadRecord {
        self.records
            .get_mut(&tid)
            .unwrap_or_else(|| panic!("Internal failure: {} has no thread record", tid))
    }

    pub(crate) fn det_lock(&self, lock: LockId) -> &LockState {
        self.locks
            .get(&lock)
            .unwrap_or_else(|| panic!("Internal failure: {} is not registered", lock))
    }

    pub(crate) fn det_lock_mut(&mut self, lock: LockId) -> &mut LockState {
        self.locks
            .get_mut(&lock)
            .unwrap_or_else(|| panic!("Internal failure: {} is not registered", lock))
    }

    /// Append to the schedule trace, if recording.
    pub(crate) fn record(&mut self, ev: SchedEvent) {
        if let Some(trace) = &mut self.trace {
            trace.push(ev);
        }
    }

    /// The slot of a primary.  Panics if `tid` is not in the primary set.
    fn slot_of(&self, tid: ThreadId) -> Slot {
        self.primaries
            .iter()
            .position(|t| *t == tid)
            .unwrap_or_else(|| {
                panic!(
                    "Internal failure: {} is flagged primary but missing from primaries {:?}",
                    tid, self.primaries
                )
            })
    }

    /// Tell the owner of the head step, if it is already a primary, to stop waiting.
    fn wake_head(&mut self) {
        if let Some(head) = self.live.head() {
            if let Some(&next) = self.primaries.get(head) {
                self.thread_mut(next).set_waiting_for_turn(false);
            }
        }
    }

    /// Clear the lock link of `tid`, strip it from that lock's queue, and wake it.
    pub(crate) fn dequeue_thread(&mut self, tid: ThreadId) {
        if let Some(lock) = self.thread_mut(tid).take_enqueued() {
            if let Some(state) = self.locks.get_mut(&lock) {
                state.remove_from_queue(tid);
            }
        }
    }

    /// Non-primary, non-terminated threads that could fill the current or the next round.
    fn pending_candidates(&self) -> usize {
        self.thread_list
            .iter()
            .filter(|t| {
                let rec = self.thread(**t);
                !rec.is_terminated() && !rec.is_primary()
            })
            .count()
    }

    fn total_order_to_string(&self) -> String {
        let mut s = String::new();
        let order = self.live.total_order();
        write!(&mut s, "{:?} is [", order).unwrap();
        for (ix, slot) in order.iter().enumerate() {
            if ix > 0 {
                s.push_str(", ");
            }
            match self.primaries.get(*slot) {
                Some(t) => write!(&mut s, "{}", t).unwrap(),
                None => s.push_str("(not yet known)"),
            }
        }
        s.push(']');
        s
    }
}

/// The deterministic user-level scheduler.
///
/// Construct one per replicated service and share it by `Arc`; independent instances do
/// not interact.
pub struct Scheduler {
    /// Immutable after construction.
    config: Config,

    state: Mutex<SchedState>,

    /// Signalled when a round closes; threads that ran out of steps wait on it.
    round_finished: Condvar,

    /// Signalled when a thread is appended; round formation waits on it.
    thread_exists: Condvar,

    eligible: Box<EligibilityFn>,
}

impl Scheduler {
    /// A scheduler whose first round uses `config.primaries` primaries with
    /// `config.steps_per_primary` steps each.
    pub fn new(config: Config) -> Result<Arc<Scheduler>, Error> {
        Self::with_eligibility(config, |_| true)
    }

    /// Like [`Scheduler::new`], with a policy restricting which threads may become
    /// primaries.
    pub fn with_eligibility<F>(config: Config, eligible: F) -> Result<Arc<Scheduler>, Error>
    where
        F: Fn(ThreadId) -> bool + Send + Sync + 'static,
    {
        config
            .validate()
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        let initial = RoundConfig::round_robin(config.primaries, config.steps_per_primary)?;
        let trace = config.record_schedule.then(ScheduleTrace::default);
        info!("[uds] scheduler starting with {}", initial);
        Ok(Arc::new(Scheduler {
            state: Mutex::new(SchedState {
                round: 0,
                next_tid: ThreadId::default(),
                next_lock: LockId::default(),
                thread_list: Vec::new(),
                records: BTreeMap::new(),
                primaries: Vec::with_capacity(config.primaries),
                live: initial.clone(),
                staged: initial,
                admission_queue: VecDeque::new(),
                locks: BTreeMap::new(),
                threads_scheduled: 0,
                threads_terminated: 0,
                trace,
            }),
            config,
            round_finished: Condvar::new(),
            thread_exists: Condvar::new(),
            eligible: Box::new(eligible),
        }))
    }

    /// The configuration this scheduler was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn lock_state(&self, what: &str) -> StateGuard<'_> {
        lock_recovering(&self.state, what)
    }

    /// Admit a unit of work as a new logical thread and start it on its own OS thread.
    ///
    /// Blocks while the thread list is longer than the admission bound, until a round
    /// start prunes terminated threads.  `on_complete` runs on the worker after `work`
    /// returns; the logical thread terminates afterwards, or when `work` panics.
    pub fn submit<W, C>(self: &Arc<Self>, work: W, on_complete: C) -> Result<ThreadId, Error>
    where
        W: FnOnce(&ThreadHandle) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let mut guard = self.lock_state("submit");
        let tid = guard.next_tid;
        guard.next_tid = tid.next();
        guard.records.insert(tid, ThreadRecord::new(tid));
        trace!("[uds] submit: processing {}", tid);

        let bound = self.config.admission_bound(guard.live.primaries());
        if guard.thread_list.len() > bound {
            debug!(
                "[uds] submit: {} blocks, {} threads listed (bound {})",
                tid,
                guard.thread_list.len(),
                bound
            );
            guard.admission_queue.push_back(tid);
            let signals = guard.thread(tid).signals();
            guard = signals.await_admission(guard, tid);
            debug!("[uds] submit: {} admitted", tid);
        }

        let handle = ThreadHandle::new(self.clone(), tid);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, tid.as_raw()))
            .spawn(move || run_logical_thread(handle, work, on_complete));
        if let Err(err) = spawned {
            guard.records.remove(&tid);
            return Err(Error::Spawn(err));
        }

        // The new OS thread blocks on the coordination mutex until we release it below.
        guard.thread_list.push(tid);
        guard.thread_mut(tid).set_started();
        guard.threads_scheduled += 1;
        if enabled!(Level::TRACE) {
            trace!("[uds] submit: thread list {:?}", guard.thread_list);
        }

        // Round formation may be stalled waiting for this thread.
        self.thread_exists.notify_all();
        Ok(tid)
    }

    /// Like [`Scheduler::submit`], then submit no-op units until there are enough
    /// candidates to fill the current round, so that it can close even without further
    /// traffic.
    pub fn fill_round<W, C>(self: &Arc<Self>, work: W, on_complete: C) -> Result<ThreadId, Error>
    where
        W: FnOnce(&ThreadHandle) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let tid = self.submit(work, on_complete)?;
        let missing = {
            let guard = self.lock_state("fill_round");
            guard
                .live
                .primaries()
                .saturating_sub(guard.primaries.len() + guard.pending_candidates())
        };
        if missing > 0 {
            debug!("[uds] fill_round: adding {} no-op threads", missing);
        }
        for _ in 0..missing {
            self.submit(|_| {}, || {})?;
        }
        Ok(tid)
    }

    /// See [`ThreadHandle::wait_for_turn`].
    pub(crate) fn wait_for_turn(&self, tid: ThreadId) {
        let guard = self.lock_state("wait_for_turn");
        drop(self.wait_for_turn_locked(guard, tid));
    }

    /// The sole serialization point: returns once `tid` consumed the head step of the
    /// live total order.
    pub(crate) fn wait_for_turn_locked<'a>(
        &'a self,
        mut guard: StateGuard<'a>,
        tid: ThreadId,
    ) -> StateGuard<'a> {
        if guard.round == 0 {
            guard = self.start_round(guard);
        }
        let signals = guard.thread(tid).signals();

        loop {
            guard = signals.wait_for_primary(guard, tid);
            let slot = guard.slot_of(tid);

            if !guard.live.has_steps_for(slot) {
                // Out of steps: this round has nothing more for us.
                trace!("[uds] {} has no steps left in round {}", tid, guard.round);
                guard.thread_mut(tid).set_finished(true);
                guard = self.check_for_end_of_round(guard);
                guard = wait_until(guard, &self.round_finished, "round end", |s| {
                    !s.thread(tid).is_finished()
                });
            } else if guard.live.head() == Some(slot) {
                guard.live.pop_head();
                let round = guard.round;
                detlog_debug!("[uds] round {} turn: {} (slot {})", round, tid, slot);
                if enabled!(Level::TRACE) {
                    trace!("[uds] total order left is {}", guard.total_order_to_string());
                }
                guard.record(SchedEvent::Turn {
                    round,
                    thread: tid,
                    slot,
                });
                guard.wake_head();
                return guard;
            } else {
                guard.thread_mut(tid).set_waiting_for_turn(true);
                guard = self.check_for_end_of_round(guard);
                guard = signals.await_turn(guard, tid);
            }
        }
    }

    /// Close the round if no primary can make progress, and start the next one.  Repeats
    /// while the freshly started round is itself closeable.
    pub(crate) fn check_for_end_of_round<'a>(&'a self, mut guard: StateGuard<'a>) -> StateGuard<'a> {
        loop {
            let state = &*guard;
            if state.primaries.len() < state.live.primaries() {
                trace!("[uds] round {}: not all primaries seen yet", state.round);
                return guard;
            }
            if let Some(busy) = state
                .primaries
                .iter()
                .find(|t| state.thread(**t).can_progress())
            {
                trace!("[uds] round {} not over: {}", state.round, state.thread(*busy));
                return guard;
            }

            debug!("[uds] end of round {} detected", guard.round);
            let primaries = mem::take(&mut guard.primaries);
            for tid in primaries {
                let rec = guard.thread_mut(tid);
                rec.set_primary(false);
                rec.set_finished(false);
                rec.set_waiting_for_turn(false);
                guard.dequeue_thread(tid);
            }
            // Nobody can be primary right now, so only the "out of steps" waiters need a
            // wake-up; they will re-check once the next round is filled.
            self.round_finished.notify_all();
            guard = self.start_round(guard);
        }
    }

    /// Apply the staged configuration, prune terminated threads, and fill the primary
    /// set from the front of the thread list, blocking for new threads if it runs out.
    fn start_round<'a>(&'a self, mut guard: StateGuard<'a>) -> StateGuard<'a> {
        guard.round += 1;
        guard.primaries.clear();
        guard.live = guard.staged.clone();
        // Selected primaries may take turns while the fill below waits for threads.
        let total_order = guard.live.total_order();
        debug!("[uds] starting round {} with {}", guard.round, guard.live);

        // Pruning before filling lets blocked submitters supply the threads we need.
        let state = &mut *guard;
        let records = &mut state.records;
        let before = state.thread_list.len();
        state.thread_list.retain(|t| {
            let terminated = records[t].is_terminated();
            if terminated {
                records.remove(t);
            }
            !terminated
        });
        let pruned = before - state.thread_list.len();
        if pruned > 0 {
            trace!("[uds] pruned {} terminated threads", pruned);
            while let Some(waiter) = state.admission_queue.pop_front() {
                state.thread_mut(waiter).admit();
            }
        }

        let wanted = guard.live.primaries();
        let mut ix = 0;
        while guard.primaries.len() < wanted {
            guard = wait_until(guard, &self.thread_exists, "new threads", |s| {
                s.thread_list
                    .get(ix)
                    .is_some_and(|t| s.thread(*t).is_started())
            });
            let tid = guard.thread_list[ix];
            if !guard.thread(tid).is_terminated() && (self.eligible)(tid) {
                trace!("[uds] adding {} to primaries", tid);
                guard.thread_mut(tid).set_primary(true);
                guard.primaries.push(tid);
            }
            ix += 1;
        }

        let round = guard.round;
        let primaries = guard.primaries.clone();
        detlog_debug!(
            "[uds] round {} primaries {:?} total order {:?}",
            round,
            primaries,
            total_order
        );
        guard.record(SchedEvent::RoundStarted {
            round,
            primaries,
            total_order,
        });
        guard
    }

    /// Retire a logical thread: become primary one last time, strip the remaining steps of
    /// its slot, and let the round close if this was the last busy primary.
    pub(crate) fn terminate(&self, tid: ThreadId) {
        let mut guard = self.lock_state("terminate");
        debug!("[uds] {} terminating", tid);
        // Without any ordered step so far, nobody may have started a round yet.
        if guard.round == 0 {
            guard = self.start_round(guard);
        }
        let signals = guard.thread(tid).signals();
        guard = signals.wait_for_primary(guard, tid);

        let held: Vec<LockId> = guard
            .locks
            .iter()
            .filter(|(_, l)| l.owner() == Some(tid))
            .map(|(id, _)| *id)
            .collect();
        if !held.is_empty() {
            warn!("[uds] {} terminates while still holding {:?}", tid, held);
        }

        guard.thread_mut(tid).set_terminated();
        let slot = guard.slot_of(tid);
        let stripped = guard.live.remove_slot(slot);
        trace!("[uds] {} stripped {} unused steps of slot {}", tid, stripped, slot);
        guard.wake_head();
        guard.threads_terminated += 1;
        let round = guard.round;
        guard.record(SchedEvent::Terminated { round, thread: tid });

        // May start the next round, which prunes our record.
        drop(self.check_for_end_of_round(guard));
    }

    /// Take a turn, then stage the configuration computed from the currently staged one.
    /// Returns the staged number of primaries.
    pub(crate) fn request_reconfiguration<F>(&self, tid: ThreadId, f: F) -> Result<usize, Error>
    where
        F: FnOnce(&RoundConfig) -> (usize, usize),
    {
        let guard = self.lock_state("request_reconfiguration");
        let mut guard = self.wait_for_turn_locked(guard, tid);
        let (primaries, steps_per_primary) = f(&guard.staged);
        let new = RoundConfig::round_robin(primaries, steps_per_primary)?;
        let round = guard.round;
        detlog!(
            "[uds] round {}: {} requests {} primaries x {} steps",
            round,
            tid,
            primaries,
            steps_per_primary
        );
        guard.staged = new;
        guard.record(SchedEvent::Reconfigured {
            round,
            primaries,
            steps_per_primary,
        });
        Ok(guard.staged.primaries())
    }

    pub(crate) fn register_lock(&self) -> LockId {
        let mut guard = self.lock_state("register_lock");
        let id = guard.next_lock;
        guard.next_lock = id.next();
        guard.locks.insert(id, LockState::default());
        id
    }

    pub(crate) fn unregister_lock(&self, id: LockId) -> Option<LockState> {
        self.lock_state("unregister_lock").locks.remove(&id)
    }

    /// The current round number; zero before the first round.
    pub fn current_round_number(&self) -> u64 {
        self.lock_state("current_round_number").round
    }

    /// Number of primaries of the live configuration.
    pub fn current_primary_count(&self) -> usize {
        self.lock_state("current_primary_count").live.primaries()
    }

    /// Logical threads ever appended to the thread list.
    pub fn threads_scheduled_total(&self) -> u64 {
        self.lock_state("threads_scheduled_total").threads_scheduled
    }

    /// Logical threads that terminated.
    pub fn threads_terminated_total(&self) -> u64 {
        self.lock_state("threads_terminated_total").threads_terminated
    }

    /// A consistent snapshot of the scheduler's counters and configurations.
    pub fn summary(&self) -> SchedulerSummary {
        let guard = self.lock_state("summary");
        SchedulerSummary {
            round: guard.round,
            live_primaries: guard.live.primaries(),
            live_total_order_len: guard.live.len(),
            staged_primaries: guard.staged.primaries(),
            staged_steps_per_primary: guard.staged.steps_per_primary(),
            threads_listed: guard.thread_list.len(),
            admission_waiters: guard.admission_queue.len(),
            threads_scheduled: guard.threads_scheduled,
            threads_terminated: guard.threads_terminated,
            locks: guard.locks.len(),
        }
    }

    /// A copy of the schedule recorded so far; `None` unless `record_schedule` is set.
    pub fn schedule_trace(&self) -> Option<ScheduleTrace> {
        self.lock_state("schedule_trace").trace.clone()
    }

    /// A multi-line description of every listed thread, for debugging stalls.
    pub fn full_summary(&self) -> String {
        let summary = self.summary();
        let guard = self.lock_state("full_summary");
        let mut s = format!("{}\nprimaries: {:?}\n", summary, guard.primaries);
        for tid in &guard.thread_list {
            writeln!(&mut s, "  {}", guard.thread(*tid)).unwrap();
        }
        s
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Body of every worker OS thread.
fn run_logical_thread<W, C>(handle: ThreadHandle, work: W, on_complete: C)
where
    W: FnOnce(&ThreadHandle),
    C: FnOnce(),
{
    let _terminate = TerminateOnDrop(&handle);
    work(&handle);
    on_complete();
}
