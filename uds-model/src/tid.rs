/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Identifiers of logical threads and deterministic locks.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

// Deterministic logical thread and lock identifiers:
//--------------------------------------------------------------------------------

/// Identifier of a logical thread. Assigned in submission order by one scheduler
/// instance, starting at zero.
#[derive(
    PartialEq, // Silly protection from rustfmt disagreements.
    Debug,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
)]
pub struct ThreadId(u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl ThreadId {
    /// Create a ThreadId from a raw counter value.
    pub const fn from_raw(id: u64) -> ThreadId {
        ThreadId(id)
    }

    /// Convert to a raw integer.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(self) -> ThreadId {
        ThreadId(self.0 + 1)
    }
}

/// Accepts both `7` and `T7`.
impl FromStr for ThreadId {
    type Err = <u64 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('T').unwrap_or(s);
        Ok(Self::from_raw(digits.parse::<u64>()?))
    }
}

/// Identifier of a deterministic lock, unique within one scheduler instance.
#[derive(
    PartialEq,
    Debug,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
)]
pub struct LockId(u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl LockId {
    /// Create a LockId from a raw counter value.
    pub const fn from_raw(id: u64) -> LockId {
        LockId(id)
    }

    /// Convert to a raw integer.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(self) -> LockId {
        LockId(self.0 + 1)
    }
}
