/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Logical threads: the per-worker scheduling state, and the handle a unit of work uses
//! to reach the scheduler.

use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;

use tracing::trace;
use uds_model::LockId;
use uds_model::ThreadId;

use crate::error::Error;
use crate::monitor::wait_until;
use crate::scheduler::Scheduler;
use crate::scheduler::StateGuard;

/// The private wait conditions of one logical thread.  All of them are used with the
/// scheduler's coordination mutex.
#[derive(Debug, Default)]
pub(crate) struct ThreadSignals {
    primary: Condvar,
    turn: Condvar,
    admission: Condvar,
    dequeue: Condvar,
}

impl ThreadSignals {
    /// Wait to become a primary of the current round.
    pub(crate) fn wait_for_primary<'a>(&self, guard: StateGuard<'a>, tid: ThreadId) -> StateGuard<'a> {
        wait_until(guard, &self.primary, "primary", |s| s.thread(tid).is_primary())
    }

    /// Wait until the thread's turn was signalled (or the round ended).
    pub(crate) fn await_turn<'a>(&self, guard: StateGuard<'a>, tid: ThreadId) -> StateGuard<'a> {
        wait_until(guard, &self.turn, "turn", |s| !s.thread(tid).is_waiting_for_turn())
    }

    /// Wait until a round start admits this (not yet listed) thread.
    pub(crate) fn await_admission<'a>(&self, guard: StateGuard<'a>, tid: ThreadId) -> StateGuard<'a> {
        wait_until(guard, &self.admission, "admission", |s| s.thread(tid).is_admitted())
    }

    /// Wait until the thread is no longer enqueued on `lock`, or owns it.
    pub(crate) fn await_dequeueing<'a>(
        &self,
        guard: StateGuard<'a>,
        tid: ThreadId,
        lock: LockId,
    ) -> StateGuard<'a> {
        wait_until(guard, &self.dequeue, "dequeueing", |s| {
            s.det_lock(lock).owner() == Some(tid) || s.thread(tid).enqueued().is_none()
        })
    }
}

/// Scheduling state of one logical thread.  Every mutator must be called with the
/// coordination mutex held, which the `&mut` borrow through the state guard enforces.
#[derive(Debug)]
pub(crate) struct ThreadRecord {
    id: ThreadId,
    /// Appended to the thread list and running on an OS thread.
    started: bool,
    /// Selected into the current round's primary set.
    primary: bool,
    /// Out of steps for the current round.
    finished: bool,
    /// Retired; never selected again, pruned at the next round start.
    terminated: bool,
    /// Blocked until the head of the total order is its slot.
    waiting_for_turn: bool,
    /// Released from admission backpressure.
    admitted: bool,
    /// The lock whose wait queue holds this thread.
    enqueued: Option<LockId>,
    signals: Arc<ThreadSignals>,
}

impl ThreadRecord {
    pub(crate) fn new(id: ThreadId) -> Self {
        ThreadRecord {
            id,
            started: false,
            primary: false,
            finished: false,
            terminated: false,
            waiting_for_turn: false,
            admitted: false,
            enqueued: None,
            signals: Arc::new(ThreadSignals::default()),
        }
    }

    pub(crate) fn signals(&self) -> Arc<ThreadSignals> {
        self.signals.clone()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn is_primary(&self) -> bool {
        self.primary
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn is_waiting_for_turn(&self) -> bool {
        self.waiting_for_turn
    }

    pub(crate) fn is_admitted(&self) -> bool {
        self.admitted
    }

    pub(crate) fn enqueued(&self) -> Option<LockId> {
        self.enqueued
    }

    /// A primary that can still make progress in the current round keeps the round open.
    pub(crate) fn can_progress(&self) -> bool {
        !self.terminated && self.enqueued.is_none() && !self.finished && !self.waiting_for_turn
    }

    pub(crate) fn set_started(&mut self) {
        self.started = true;
    }

    /// Wakes the thread on the false -> true edge only.
    pub(crate) fn set_primary(&mut self, primary: bool) {
        let old = self.primary;
        self.primary = primary;
        trace!("[uds] {} primary: {} -> {}", self.id, old, primary);
        if !old && primary {
            self.signals.primary.notify_one();
        }
    }

    pub(crate) fn set_finished(&mut self, finished: bool) {
        self.finished = finished;
    }

    pub(crate) fn set_terminated(&mut self) {
        self.terminated = true;
    }

    /// Wakes the thread on the true -> false edge only.
    pub(crate) fn set_waiting_for_turn(&mut self, waiting: bool) {
        if self.waiting_for_turn && !waiting {
            self.signals.turn.notify_one();
        }
        self.waiting_for_turn = waiting;
    }

    pub(crate) fn admit(&mut self) {
        self.admitted = true;
        self.signals.admission.notify_one();
    }

    pub(crate) fn set_enqueued(&mut self, lock: LockId) {
        self.enqueued = Some(lock);
    }

    /// Clear the lock link and wake the thread.  Returns the lock it was queued on; the
    /// caller strips it from that lock's queue.
    pub(crate) fn take_enqueued(&mut self) -> Option<LockId> {
        let lock = self.enqueued.take();
        if lock.is_some() {
            trace!("[uds] {} dequeued from {:?}", self.id, lock);
            self.signals.dequeue.notify_one();
        }
        lock
    }
}

impl fmt::Display for ThreadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}, ",
            self.id,
            if self.primary { "primary" } else { "not primary" }
        )?;
        if self.terminated {
            return write!(f, "terminated");
        }
        if self.finished {
            write!(f, "finished round ")?;
        }
        if let Some(lock) = self.enqueued {
            write!(f, "enqueued on {} ", lock)?;
        }
        if self.waiting_for_turn {
            write!(f, "waits for turn")
        } else {
            write!(f, "running")
        }
    }
}

/// The explicit context of one logical thread.  Each unit of work receives its handle by
/// reference and passes it to every ordering-sensitive call.
pub struct ThreadHandle {
    sched: Arc<Scheduler>,
    id: ThreadId,
}

impl ThreadHandle {
    pub(crate) fn new(sched: Arc<Scheduler>, id: ThreadId) -> Self {
        ThreadHandle { sched, id }
    }

    /// The logical thread id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The scheduler running this thread.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    /// Block until this thread may pass its next ordered step.  Identical total orders
    /// produce identical interleavings of whatever runs between successive calls.
    pub fn wait_for_turn(&self) {
        self.sched.wait_for_turn(self.id);
    }

    /// Stage a new round-robin configuration of `primaries` primaries with
    /// `steps_per_primary` steps each, applied at the next round start.  Takes an ordered
    /// step first, so the point of the request is itself deterministic.
    ///
    /// Returns the number of primaries staged.
    pub fn request_reconfiguration(
        &self,
        primaries: usize,
        steps_per_primary: usize,
    ) -> Result<usize, Error> {
        self.sched
            .request_reconfiguration(self.id, |_| (primaries, steps_per_primary))
    }

    /// Change the number of primaries, keeping the staged steps per primary.
    pub fn request_reconfiguration_primaries(&self, primaries: usize) -> Result<usize, Error> {
        self.sched
            .request_reconfiguration(self.id, |staged| (primaries, staged.steps_per_primary()))
    }

    /// Change the steps per primary, keeping the staged number of primaries.
    pub fn request_reconfiguration_steps(&self, steps_per_primary: usize) -> Result<usize, Error> {
        self.sched
            .request_reconfiguration(self.id, |staged| (staged.primaries(), steps_per_primary))
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle").field("id", &self.id).finish()
    }
}

/// Retires the logical thread when dropped, so `terminate` runs exactly once whether the
/// unit of work returned or panicked.
pub(crate) struct TerminateOnDrop<'a>(pub(crate) &'a ThreadHandle);

impl Drop for TerminateOnDrop<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::warn!(
                "[uds] unit of work on {} panicked, terminating its logical thread",
                self.0.id
            );
        }
        self.0.sched.terminate(self.0.id);
    }
}
