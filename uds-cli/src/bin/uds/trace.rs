/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs::File;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use uds::Config;
use uds::Scheduler;

use super::global_opts::GlobalOpts;
use super::workload::LockWorkload;

/// Command-line options for the "trace" subcommand.
#[derive(Debug, Parser, Clone)]
pub struct TraceOpts {
    /// Scheduler configuration.  The schedule is always recorded.
    #[clap(flatten)]
    config: Config,

    /// Units of work contending for one lock.
    #[clap(long, value_name = "uint", default_value = "4")]
    units: usize,

    /// Critical sections per unit.
    #[clap(long, value_name = "uint", default_value = "2")]
    critical_sections: usize,

    /// Stage this many primaries from the first round before the workload runs.
    #[clap(long, value_name = "uint")]
    reconfigure_to: Option<usize>,

    /// Write the schedule to a file instead of stdout.
    #[clap(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print the final scheduler summary to stderr.
    #[clap(long)]
    summary: bool,
}

impl TraceOpts {
    /// Fill the first round with a reconfiguring unit and no-ops, so the workload starts
    /// with the new primary count.
    fn reconfigure(&self, sched: &std::sync::Arc<Scheduler>, primaries: usize) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel();
        sched.submit(
            move |me| {
                let _ = tx.send(me.request_reconfiguration_primaries(primaries));
            },
            || {},
        )?;
        for _ in 1..self.config.primaries {
            sched.submit(|_| {}, || {})?;
        }
        rx.recv()
            .context("the reconfiguring unit died")?
            .context("reconfiguration request rejected")?;
        Ok(())
    }

    pub fn main(&self, _global: &GlobalOpts) -> anyhow::Result<()> {
        let config = Config {
            record_schedule: true,
            ..self.config.clone()
        };
        config.validate()?;
        let sched = Scheduler::new(config)?;

        let primaries = match self.reconfigure_to {
            Some(n) => {
                self.reconfigure(&sched, n)?;
                n
            }
            None => self.config.primaries,
        };
        let workload = LockWorkload {
            units: self.units,
            critical_sections: self.critical_sections,
            load: Duration::ZERO,
        };
        workload.run(&sched, primaries)?;

        let trace = sched
            .schedule_trace()
            .context("scheduler did not record its schedule")?;
        let mut out: Box<dyn Write> = match &self.output {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("creating {}", path.display()))?,
            ),
            None => Box::new(io::stdout().lock()),
        };
        serde_json::to_writer_pretty(&mut out, &trace)?;
        writeln!(out)?;

        if self.summary {
            eprintln!("{}", sched.summary());
        }
        Ok(())
    }
}
