/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Point-in-time summaries of a scheduler instance.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Statistics that summarize the state of a scheduler, for monitoring and for the
/// autoscaling collaborators that decide on reconfiguration requests.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    /// Current round number; zero until the first round starts.
    pub round: u64,
    /// Number of primaries of the live configuration.
    pub live_primaries: usize,
    /// Steps left in the live total order.
    pub live_total_order_len: usize,
    /// Number of primaries of the staged configuration.
    pub staged_primaries: usize,
    /// Steps per primary of the staged configuration.
    pub staged_steps_per_primary: usize,
    /// Logical threads currently in the creation-ordered thread list.
    pub threads_listed: usize,
    /// Submitters currently blocked on admission.
    pub admission_waiters: usize,
    /// Logical threads ever appended to the thread list.
    pub threads_scheduled: u64,
    /// Logical threads that have terminated.
    pub threads_terminated: u64,
    /// Live deterministic locks.
    pub locks: usize,
}

impl SchedulerSummary {
    /// Logical threads that were started but have not terminated yet.
    pub fn threads_in_flight(&self) -> u64 {
        self.threads_scheduled - self.threads_terminated
    }
}

/// A human-readable, multi-line summary.
impl fmt::Display for SchedulerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let SchedulerSummary {
            round,
            live_primaries,
            live_total_order_len,
            staged_primaries,
            staged_steps_per_primary,
            threads_listed,
            admission_waiters,
            threads_scheduled,
            threads_terminated,
            locks,
        } = self;
        writeln!(f, "round: {}", round)?;
        writeln!(
            f,
            "live configuration: {} primaries, {} steps left",
            live_primaries, live_total_order_len
        )?;
        writeln!(
            f,
            "staged configuration: {} primaries x {} steps",
            staged_primaries, staged_steps_per_primary
        )?;
        writeln!(
            f,
            "threads: {} listed, {} scheduled, {} terminated, {} awaiting admission",
            threads_listed, threads_scheduled, threads_terminated, admission_waiters
        )?;
        write!(f, "locks: {}", locks)
    }
}
