/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Monitor-style waiting on the single coordination mutex.
//!
//! Every suspension point of the scheduler is "wait on some condition variable until a
//! predicate over the shared state holds".  Poisoning is this crate's version of an
//! interrupted wait: a worker panicked while holding the mutex.  We log it and keep
//! waiting with the recovered guard, since dropping a pending round or lock wait would
//! corrupt the round accounting of everyone else.

use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::trace;
use tracing::warn;

/// Take the mutex, recovering from poisoning.
pub(crate) fn lock_recovering<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("[uds] coordination mutex poisoned on entry to {}, continuing", what);
            poisoned.into_inner()
        }
    }
}

/// Block on `cond` until `done` holds.  The predicate is re-checked after every wake-up,
/// spurious or not, with the mutex held.
pub(crate) fn wait_until<'a, T, P>(
    mut guard: MutexGuard<'a, T>,
    cond: &Condvar,
    what: &str,
    mut done: P,
) -> MutexGuard<'a, T>
where
    P: FnMut(&mut T) -> bool,
{
    while !done(&mut guard) {
        trace!("[uds] sleeping until {}", what);
        guard = match cond.wait(guard) {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    "[uds] coordination mutex poisoned while waiting for {}, re-waiting",
                    what
                );
                poisoned.into_inner()
            }
        };
    }
    guard
}
