/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Scheduler configuration.

use anyhow::bail;
use clap::Parser;
use serde::Deserialize;
use serde::Serialize;

/// Configuration options for a deterministic scheduler instance.
///
/// The primary/step values only seed the *staged* configuration: they take effect when
/// the first round starts, exactly like a reconfiguration request would.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Parser)]
pub struct Config {
    /// Number of primaries selected into every round until reconfigured.
    #[clap(long, value_name = "uint", default_value = "1")]
    pub primaries: usize,

    /// Number of ordered steps each primary receives per round until reconfigured.
    #[clap(long, value_name = "uint", default_value = "1")]
    pub steps_per_primary: usize,

    /// Submissions block while the thread list holds more than
    /// `admission_factor * primaries + admission_slack` logical threads.
    #[clap(long, value_name = "uint", default_value = "2")]
    pub admission_factor: usize,

    /// See `admission_factor`.
    #[clap(long, value_name = "uint", default_value = "50")]
    pub admission_slack: usize,

    /// Keep an in-memory trace of scheduling events (round starts, turns, lock grants).
    #[clap(long)]
    pub record_schedule: bool,

    /// Prefix for the names of the OS threads that run logical threads.
    #[clap(long, value_name = "str", default_value = "uds-worker")]
    pub thread_name_prefix: String,
}

impl Config {
    /// Sanity check the flags.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.primaries == 0 {
            bail!("a round needs at least one primary");
        }
        if self.steps_per_primary == 0 {
            bail!("every primary needs at least one step per round");
        }
        Ok(())
    }

    /// Length of the thread list above which new submissions block, given the number of
    /// primaries of the live round configuration.
    pub fn admission_bound(&self, live_primaries: usize) -> usize {
        self.admission_factor
            .saturating_mul(live_primaries)
            .saturating_add(self.admission_slack)
    }
}

/// The built-in defaults; independent of the environment.
impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["uds"])
    }
}
