/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs::File;
use std::io;
use std::io::stderr;
use std::io::IsTerminal;

use anyhow::Context;
use tracing::metadata::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_TRACE_LEVEL: LevelFilter = LevelFilter::WARN;

fn env_filter(level: Option<LevelFilter>) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.unwrap_or(DEFAULT_TRACE_LEVEL).into())
}

/// Initializes non-blocking tracing to the given file `f`.  Log lines are only
/// guaranteed to be flushed once the returned guard is dropped.
#[must_use = "This function returns a guard that should not be immediately dropped"]
pub fn init_file_tracing(level: Option<LevelFilter>, f: File) -> anyhow::Result<impl Drop> {
    let (writer, guard) = tracing_appender::non_blocking(f);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true)
        .finish()
        .try_init()
        .context("installing the global tracing subscriber")?;
    Ok(guard)
}

/// Initializes tracing to `stderr`.
///
/// NOTE: Writes to stderr are unbuffered, so this may be slow.
pub fn init_stderr_tracing(level: Option<LevelFilter>) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(io::stderr)
        .with_ansi(stderr().is_terminal())
        .with_thread_names(true)
        .finish()
        .try_init()
        .context("installing the global tracing subscriber")
}
