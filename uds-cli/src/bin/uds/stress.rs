/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use tracing::info;
use uds::Config;
use uds::Scheduler;

use super::global_opts::GlobalOpts;
use super::workload::spin_for;
use super::workload::LockWorkload;

/// Command-line options for the "stress" subcommand.
#[derive(Debug, Parser, Clone)]
pub struct StressOpts {
    /// Scheduler configuration; `--primaries` is overridden by `--primaries-list`.
    #[clap(flatten)]
    config: Config,

    /// Primary counts to measure, one run each.
    #[clap(
        long,
        value_name = "LIST",
        value_delimiter = ',',
        default_value = "1,2,3,4,5,6,7,8,10,12,14,16,20"
    )]
    primaries_list: Vec<usize>,

    /// Units of work per run.
    #[clap(long, value_name = "uint", default_value = "1000")]
    threads: usize,

    /// Busy-waiting between the two critical sections of a unit, in nanoseconds.
    #[clap(long, value_name = "nanos", default_value = "250000")]
    load_nanos: u64,

    /// Also run the same workload on plain OS threads and a plain mutex.
    #[clap(long)]
    baseline: bool,

    /// Print one JSON object per run instead of a table.
    #[clap(long)]
    json: bool,
}

/// Outcome of one measured run.
#[derive(Debug, Serialize)]
struct StressResult {
    mode: &'static str,
    primaries: Option<usize>,
    threads: usize,
    elapsed_ms: f64,
    throughput: f64,
}

impl StressResult {
    fn new(mode: &'static str, primaries: Option<usize>, threads: usize, elapsed: Duration) -> Self {
        StressResult {
            mode,
            primaries,
            threads,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            throughput: threads as f64 / elapsed.as_secs_f64(),
        }
    }
}

impl StressOpts {
    fn workload(&self) -> LockWorkload {
        LockWorkload {
            units: self.threads,
            critical_sections: 2,
            load: Duration::from_nanos(self.load_nanos),
        }
    }

    fn run_uds(&self, primaries: usize) -> anyhow::Result<StressResult> {
        let config = Config {
            primaries,
            ..self.config.clone()
        };
        config
            .validate()
            .with_context(|| format!("invalid configuration for {} primaries", primaries))?;
        let sched = Scheduler::new(config)?;
        let workload = self.workload();
        info!(
            "adding {} threads to a scheduler with {} primaries",
            workload.padded_units(primaries),
            primaries
        );
        let elapsed = workload.run(&sched, primaries)?;
        info!("final state:\n{}", sched.summary());
        Ok(StressResult::new(
            "uds",
            Some(primaries),
            workload.padded_units(primaries),
            elapsed,
        ))
    }

    /// The same units on unscheduled OS threads.
    fn run_baseline(&self) -> anyhow::Result<StressResult> {
        let lock = Arc::new(Mutex::new(0usize));
        let load = Duration::from_nanos(self.load_nanos);
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        for ix in 0..self.threads {
            let (lock, tx) = (lock.clone(), tx.clone());
            thread::Builder::new()
                .name(format!("baseline-{}", ix))
                .spawn(move || {
                    drop(lock.lock());
                    spin_for(load);
                    if let Ok(mut count) = lock.lock() {
                        *count += 1;
                    }
                    let _ = tx.send(());
                })
                .context("spawning a baseline thread")?;
        }
        drop(tx);
        for _ in 0..self.threads {
            rx.recv().context("a baseline thread died")?;
        }
        Ok(StressResult::new("baseline", None, self.threads, start.elapsed()))
    }

    fn report(&self, res: &StressResult) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(res)?);
        } else {
            let primaries = res
                .primaries
                .map_or_else(|| "-".to_string(), |n| n.to_string());
            println!(
                "{:>9} {:>10} {:>8} {:>12.1} {:>14.1}",
                res.mode, primaries, res.threads, res.elapsed_ms, res.throughput
            );
        }
        Ok(())
    }

    pub fn main(&self, _global: &GlobalOpts) -> anyhow::Result<()> {
        if !self.json {
            println!(
                "{}",
                format!(
                    "{:>9} {:>10} {:>8} {:>12} {:>14}",
                    "mode", "primaries", "threads", "elapsed ms", "threads/s"
                )
                .bold()
            );
        }
        if self.baseline {
            self.report(&self.run_baseline()?)?;
        }
        for primaries in &self.primaries_list {
            self.report(&self.run_uds(*primaries)?)?;
        }
        Ok(())
    }
}
