/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A mutex whose acquisition order follows the scheduler's total order.
//!
//! The *request* for the lock is an ordered step: `lock` waits for its turn before it
//! even looks at the owner.  Two replicas given the same workload and the same total order
//! therefore contend in the same order and observe the same grant sequence, whatever the
//! OS thread scheduler does.  Releasing is not an ordered step; ownership is handed to the
//! head of the FIFO wait queue directly.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;
use tracing::trace;
use tracing::warn;
use uds_model::LockId;
use uds_model::SchedEvent;
use uds_model::ThreadId;

use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::thread::ThreadHandle;

/// Ownership and wait queue of one deterministic lock.  Lives in the scheduler state so
/// that it is guarded by the coordination mutex together with the round state.
#[derive(Debug, Default)]
pub(crate) struct LockState {
    owner: Option<ThreadId>,
    queue: VecDeque<ThreadId>,
}

impl LockState {
    pub(crate) fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    pub(crate) fn queue(&self) -> impl Iterator<Item = &ThreadId> {
        self.queue.iter()
    }

    /// Idempotent.
    pub(crate) fn remove_from_queue(&mut self, tid: ThreadId) {
        self.queue.retain(|t| *t != tid);
    }
}

/// A deterministic, non-reentrant lock.
///
/// Created from a scheduler and usable only by logical threads of that scheduler.
pub struct DetLock {
    sched: Arc<Scheduler>,
    id: LockId,
}

impl DetLock {
    /// Register a new, unheld lock with the scheduler.
    pub fn new(sched: &Arc<Scheduler>) -> DetLock {
        let id = sched.register_lock();
        DetLock {
            sched: sched.clone(),
            id,
        }
    }

    /// This lock's id, as it appears in schedule traces.
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Take an ordered step, then acquire the lock, blocking in its FIFO queue while
    /// another thread holds it.
    ///
    /// Panics if the calling thread already owns the lock.
    pub fn lock(&self, me: &ThreadHandle) {
        debug_assert!(Arc::ptr_eq(&self.sched, me.scheduler()));
        let tid = me.id();
        let mut guard = self.sched.lock_state("DetLock::lock");
        if guard.det_lock(self.id).owner == Some(tid) {
            panic!("{} tried to re-acquire {} which it already holds", tid, self.id);
        }
        debug!("[uds] {} locking {}", tid, self.id);

        loop {
            guard = self.sched.wait_for_turn_locked(guard, tid);

            let round = guard.round();
            let state = guard.det_lock_mut(self.id);
            trace!(
                "[uds] {} finds {} with owner {:?}",
                tid,
                self.id,
                state.owner
            );
            if state.owner.is_none() {
                state.owner = Some(tid);
                guard.record(SchedEvent::LockAcquired {
                    round,
                    lock: self.id,
                    thread: tid,
                    queued: false,
                });
                return;
            }

            debug!("[uds] {} enqueues itself at {}", tid, self.id);
            state.queue.push_back(tid);
            guard.thread_mut(tid).set_enqueued(self.id);

            // An enqueued primary may be the last one that kept the round open.
            guard = self.sched.check_for_end_of_round(guard);
            let signals = guard.thread(tid).signals();
            guard = signals.await_dequeueing(guard, tid, self.id);

            if guard.det_lock(self.id).owner == Some(tid) {
                return;
            }
            // Dequeued at a round boundary instead of being handed the lock: ask again.
            debug!(
                "[uds] {} was dequeued from {} without ownership, retrying",
                tid, self.id
            );
        }
    }

    /// Release the lock and hand it to the head of the wait queue, if any.
    ///
    /// Fails without touching the lock if the caller is not the owner: a broken mutual
    /// exclusion discipline would desynchronize replicas.
    pub fn unlock(&self, me: &ThreadHandle) -> Result<(), Error> {
        let tid = me.id();
        let mut guard = self.sched.lock_state("DetLock::unlock");
        let round = guard.round();
        let state = guard.det_lock_mut(self.id);
        if state.owner != Some(tid) {
            return Err(Error::NotOwner {
                lock: self.id,
                caller: tid,
                owner: state.owner,
            });
        }

        let next = state.queue.front().copied();
        state.owner = next;
        match next {
            None => debug!("[uds] {} released {}", tid, self.id),
            Some(next) => {
                debug!("[uds] {} released {}, handing it to {}", tid, self.id, next);
                guard.dequeue_thread(next);
                guard.record(SchedEvent::LockAcquired {
                    round,
                    lock: self.id,
                    thread: next,
                    queued: true,
                });
            }
        }
        Ok(())
    }

    /// Run `f` while holding the lock.
    pub fn with<R>(&self, me: &ThreadHandle, f: impl FnOnce() -> R) -> Result<R, Error> {
        self.lock(me);
        let res = f();
        self.unlock(me)?;
        Ok(res)
    }

    /// Strip `thread` from the wait queue, clearing its link and waking it if it was queued
    /// here.  Idempotent.
    pub fn remove_from_queue(&self, thread: ThreadId) {
        let mut guard = self.sched.lock_state("DetLock::remove_from_queue");
        if guard.thread_opt(thread).and_then(|t| t.enqueued()) == Some(self.id) {
            guard.dequeue_thread(thread);
        } else {
            guard.det_lock_mut(self.id).remove_from_queue(thread);
        }
    }

    /// The current owner.  Racy unless called by the owner itself.
    pub fn owner(&self) -> Option<ThreadId> {
        self.sched.lock_state("DetLock::owner").det_lock(self.id).owner
    }

    /// Threads currently waiting for this lock, in grant order.
    pub fn queued(&self) -> Vec<ThreadId> {
        self.sched
            .lock_state("DetLock::queued")
            .det_lock(self.id)
            .queue()
            .copied()
            .collect()
    }
}

impl Drop for DetLock {
    fn drop(&mut self) {
        let state = self.sched.unregister_lock(self.id);
        if let Some(state) = state {
            if state.owner.is_some() || !state.queue.is_empty() {
                warn!(
                    "[uds] {} dropped while held by {:?} with {} waiters",
                    self.id,
                    state.owner,
                    state.queue.len()
                );
            }
        }
    }
}

impl std::fmt::Debug for DetLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetLock").field("id", &self.id).finish()
    }
}
