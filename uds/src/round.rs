/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Round configurations: a primary count and the total order of their steps.
//!
//! The scheduler keeps two of these.  The *staged* one is written by reconfiguration
//! requests at any time; the *live* one is a copy taken at round start and is consumed
//! step by step as primaries pass their turns.  Because the copy only happens at a round
//! boundary, every replica applies a reconfiguration at the same logical point.

use std::collections::VecDeque;
use std::fmt;

use crate::error::Error;

/// Index of a primary within the primary set of a round.
pub type Slot = usize;

/// A primary count `N` together with a total order over slots `0..N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundConfig {
    primaries: usize,
    /// INVARIANT: every entry is `< primaries`.
    total_order: VecDeque<Slot>,
}

impl RoundConfig {
    /// Build the round-robin total order: `steps_per_primary` passes over `0..primaries`.
    pub fn round_robin(primaries: usize, steps_per_primary: usize) -> Result<RoundConfig, Error> {
        if primaries == 0 {
            return Err(Error::InvalidConfiguration(
                "a round needs at least one primary".into(),
            ));
        }
        if steps_per_primary == 0 {
            return Err(Error::InvalidConfiguration(
                "every primary needs at least one step per round".into(),
            ));
        }
        let total_order = (0..steps_per_primary)
            .flat_map(|_| 0..primaries)
            .collect::<VecDeque<_>>();
        Ok(RoundConfig {
            primaries,
            total_order,
        })
    }

    /// Number of primaries per round.
    pub fn primaries(&self) -> usize {
        self.primaries
    }

    /// Steps per primary, as implied by the length of the total order.  Only meaningful
    /// for an unconsumed (staged) configuration.
    pub fn steps_per_primary(&self) -> usize {
        self.total_order.len() / self.primaries
    }

    /// Steps left.
    pub fn len(&self) -> usize {
        self.total_order.len()
    }

    /// True once every step was consumed or stripped.
    pub fn is_empty(&self) -> bool {
        self.total_order.is_empty()
    }

    /// The slot allowed to take the next step.
    pub fn head(&self) -> Option<Slot> {
        self.total_order.front().copied()
    }

    /// Does this slot still own any step?
    pub fn has_steps_for(&self, slot: Slot) -> bool {
        self.total_order.contains(&slot)
    }

    /// Consume the head step.
    pub(crate) fn pop_head(&mut self) -> Option<Slot> {
        self.total_order.pop_front()
    }

    /// Strip every remaining step of `slot`, returning how many there were.
    pub(crate) fn remove_slot(&mut self, slot: Slot) -> usize {
        let before = self.total_order.len();
        self.total_order.retain(|s| *s != slot);
        before - self.total_order.len()
    }

    /// The remaining total order, head first.
    pub fn total_order(&self) -> Vec<Slot> {
        self.total_order.iter().copied().collect()
    }
}

impl fmt::Display for RoundConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} primaries, order {:?}", self.primaries, self.total_order)
    }
}
