/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Widely-shared type definitions for the deterministic user-level scheduler.

#![deny(clippy::all)]
#![warn(missing_docs)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod schedule;
pub mod summary;
pub mod tid;

pub use config::Config;
pub use schedule::SchedEvent;
pub use schedule::ScheduleTrace;
pub use summary::SchedulerSummary;
pub use tid::LockId;
pub use tid::ThreadId;
