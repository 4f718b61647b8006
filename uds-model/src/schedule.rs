/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Recorded scheduling decisions and their deterministic projections.

use serde::Deserialize;
use serde::Serialize;

use crate::tid::LockId;
use crate::tid::ThreadId;

// Scheduler events
//--------------------------------------------------------------------------------

/// A scheduling decision taken under the coordination mutex.  These can be recorded and
/// compared between runs (or replicas) to check that they executed the same schedule.
#[derive(PartialEq, Debug, Eq, Clone, Hash, Serialize, Deserialize)]
pub enum SchedEvent {
    /// A round was filled with its primaries and its live configuration.
    RoundStarted {
        /// Round number, starting at 1.
        round: u64,
        /// The primary set, indexed by slot.
        primaries: Vec<ThreadId>,
        /// The live total order of slot indices.
        total_order: Vec<usize>,
    },
    /// A primary consumed the head of the total order.
    Turn {
        /// Round in which the step was taken.
        round: u64,
        /// The thread taking the step.
        thread: ThreadId,
        /// Its slot index in the primary set.
        slot: usize,
    },
    /// A deterministic lock changed hands.
    LockAcquired {
        /// Round in which ownership was granted.
        round: u64,
        /// The lock.
        lock: LockId,
        /// The new owner.
        thread: ThreadId,
        /// True if ownership was handed over from the wait queue by `unlock`.
        queued: bool,
    },
    /// A new configuration was staged for the next round start.
    Reconfigured {
        /// Round during which the request was made.
        round: u64,
        /// Requested number of primaries.
        primaries: usize,
        /// Requested steps per primary.
        steps_per_primary: usize,
    },
    /// A logical thread retired.
    Terminated {
        /// Round in which it terminated.
        round: u64,
        /// The thread.
        thread: ThreadId,
    },
}

impl SchedEvent {
    /// The round during which the event happened.
    pub fn round(&self) -> u64 {
        match self {
            SchedEvent::RoundStarted { round, .. }
            | SchedEvent::Turn { round, .. }
            | SchedEvent::LockAcquired { round, .. }
            | SchedEvent::Reconfigured { round, .. }
            | SchedEvent::Terminated { round, .. } => *round,
        }
    }
}

/// A recorded sequence of scheduler events, in the order they were committed.
///
/// Only some projections of the trace are deterministic: the global position of a lock
/// hand-off depends on when the owner called `unlock`, which is not an ordered step.
#[derive(PartialEq, Debug, Eq, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleTrace {
    /// All events.
    pub events: Vec<SchedEvent>,
}

impl ScheduleTrace {
    /// Append an event.
    pub fn push(&mut self, ev: SchedEvent) {
        self.events.push(ev);
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The serialized sequence of turns: `(round, thread, slot)`.
    pub fn turns(&self) -> Vec<(u64, ThreadId, usize)> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                SchedEvent::Turn {
                    round,
                    thread,
                    slot,
                } => Some((*round, *thread, *slot)),
                _ => None,
            })
            .collect()
    }

    /// Round boundaries with the primary set and total order each round started with.
    pub fn round_starts(&self) -> Vec<(u64, Vec<ThreadId>, Vec<usize>)> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                SchedEvent::RoundStarted {
                    round,
                    primaries,
                    total_order,
                } => Some((*round, primaries.clone(), total_order.clone())),
                _ => None,
            })
            .collect()
    }

    /// The order in which one lock was granted.
    pub fn lock_grants(&self, lock: LockId) -> Vec<ThreadId> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                SchedEvent::LockAcquired {
                    lock: l, thread, ..
                } if *l == lock => Some(*thread),
                _ => None,
            })
            .collect()
    }

    /// Every thread that terminated, in termination order.
    pub fn terminations(&self) -> Vec<ThreadId> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                SchedEvent::Terminated { thread, .. } => Some(*thread),
                _ => None,
            })
            .collect()
    }
}
