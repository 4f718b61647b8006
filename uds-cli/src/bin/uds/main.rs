/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

// Treat all Clippy warnings as errors.
#![deny(clippy::all)]
#![allow(clippy::uninlined_format_args)]

mod global_opts;
mod stress;
mod trace;
mod tracing;
mod workload;

use clap::AppSettings;
use clap::Parser;
use colored::*;

use self::global_opts::GlobalOpts;
use self::stress::StressOpts;
use self::trace::TraceOpts;

#[derive(Debug, Parser)]
#[clap(
    name = "uds",
    version,
    global_settings(&[AppSettings::ColoredHelp]),
)]
struct Args {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    command: Subcommand,
}

#[derive(Debug, Parser)]
enum Subcommand {
    /// Measure lock/unlock throughput for a series of primary counts.
    #[clap(name = "stress")]
    Stress(StressOpts),

    /// Run a small contended workload and print the recorded schedule as JSON.
    #[clap(name = "trace")]
    Trace(TraceOpts),
}

impl Subcommand {
    fn main(&self, global: &GlobalOpts) -> anyhow::Result<()> {
        let _guard = global.init_tracing()?;
        match self {
            Subcommand::Stress(x) => x.main(global),
            Subcommand::Trace(x) => x.main(global),
        }
    }
}

fn main() {
    let Args { global, command } = Args::parse();

    if let Err(err) = command.main(&global) {
        display_error(err);
        std::process::exit(1);
    }
}

fn display_error(error: anyhow::Error) {
    let mut chain = error.chain();

    if let Some(error) = chain.next() {
        eprintln!("{}: {}", "Error".red().bold(), error);
    }

    for cause in chain {
        eprintln!("     {} {}", ">".dimmed().bold(), cause);
    }
}
