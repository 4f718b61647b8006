/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::io;

use uds_model::LockId;
use uds_model::ThreadId;

/// Errors surfaced to callers of the scheduler and its locks.
///
/// Broken internal invariants are not represented here: they panic, because continuing
/// with corrupted round state would silently desynchronize replicas.
#[derive(Debug)]
pub enum Error {
    /// A thread tried to release a deterministic lock it does not own.
    NotOwner {
        /// The lock.
        lock: LockId,
        /// The thread calling `unlock`.
        caller: ThreadId,
        /// The actual owner, if any.
        owner: Option<ThreadId>,
    },
    /// A round configuration with zero primaries or zero steps was requested.
    InvalidConfiguration(String),
    /// The OS refused to start a worker thread.
    Spawn(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotOwner {
                lock,
                caller,
                owner: Some(owner),
            } => write!(
                f,
                "{} tried to release {} which is owned by {}",
                caller, lock, owner
            ),
            Error::NotOwner {
                lock,
                caller,
                owner: None,
            } => write!(f, "{} tried to release {} which is not held", caller, lock),
            Error::InvalidConfiguration(msg) => write!(f, "invalid round configuration: {}", msg),
            Error::Spawn(err) => write!(f, "failed to start worker thread: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Spawn(err)
    }
}
