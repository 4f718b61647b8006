/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A deterministic user-level scheduler for state-machine-replicated services.
//!
//! Requests are executed concurrently on real OS threads, yet every replica fed the same
//! request sequence produces the same interleaving at the points that matter: each call to
//! [`ThreadHandle::wait_for_turn`] and each [`DetLock`] acquisition.  Time is divided into
//! rounds; in each round a fixed number of *primaries* take turns in a configured total
//! order, and a round ends once none of them can make progress.
//!
//! ```no_run
//! use std::sync::Arc;
//! use uds::{Config, DetLock, Scheduler};
//!
//! let sched = Scheduler::new(Config::default()).unwrap();
//! let lock = Arc::new(DetLock::new(&sched));
//! sched
//!     .fill_round(
//!         move |me| {
//!             lock.lock(me);
//!             // ... mutate replicated state ...
//!             lock.unlock(me).unwrap();
//!         },
//!         || println!("request done"),
//!     )
//!     .unwrap();
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]
#![allow(clippy::uninlined_format_args)]

pub mod detlog;
mod error;
mod lock;
mod monitor;
mod round;
mod scheduler;
mod thread;

pub use error::Error;
pub use lock::DetLock;
pub use round::RoundConfig;
pub use round::Slot;
pub use scheduler::EligibilityFn;
pub use scheduler::Scheduler;
pub use thread::ThreadHandle;
pub use uds_model::Config;
pub use uds_model::LockId;
pub use uds_model::SchedEvent;
pub use uds_model::ScheduleTrace;
pub use uds_model::SchedulerSummary;
pub use uds_model::ThreadId;
