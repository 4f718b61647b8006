/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Macros for log entries that must be identical on every replica.
//! [`detlog!`](crate::detlog!) writes a deterministic log entry at INFO level.
//! [`detlog_debug!`](crate::detlog_debug!) writes a deterministic log entry at DEBUG level.
//!
//! Only facts decided under the coordination mutex in a deterministic order belong
//! here (round starts, turns, reconfiguration requests), so that the `DETLOG` lines of two
//! replicas can be diffed directly.

/// Write a should-be-deterministic scheduling fact at the INFO log level.
#[macro_export]
macro_rules! detlog {
    ($($arg:tt)+) => {{
        tracing::info!("DETLOG {}", format!($($arg)+));
    }};
}

/// Like [`detlog`], at the DEBUG level.  Used for per-turn facts, which are too
/// chatty for INFO.
#[macro_export]
macro_rules! detlog_debug {
    ($($arg:tt)+) => {{
        tracing::debug!("DETLOG {}", format!($($arg)+));
    }};
}
