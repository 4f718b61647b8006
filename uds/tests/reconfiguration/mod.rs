/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Staged reconfiguration takes effect at the next round start.

use std::sync::mpsc;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use uds::Config;
use uds::Error;
use uds::SchedEvent;
use uds::Scheduler;
use uds::ThreadId;
use uds_testutils::collect;
use uds_testutils::init_test_tracing;
use uds_testutils::wait_quiescent;
use uds_testutils::Gate;

fn t(n: u64) -> ThreadId {
    ThreadId::from_raw(n)
}

fn recording() -> Arc<Scheduler> {
    init_test_tracing();
    Scheduler::new(Config {
        record_schedule: true,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn grow_to_three_primaries() {
    let sched = recording();
    let (tx, rx) = mpsc::channel();

    let tx0 = tx.clone();
    sched
        .submit(
            move |me| {
                tx0.send(me.request_reconfiguration(3, 2).unwrap()).unwrap();
            },
            || {},
        )
        .unwrap();
    // Two full rounds of three.
    for _ in 0..6 {
        let tx = tx.clone();
        sched
            .submit(
                move |me| {
                    me.wait_for_turn();
                    me.wait_for_turn();
                    tx.send(0).unwrap();
                },
                || {},
            )
            .unwrap();
    }
    assert_eq!(collect(&rx, 7).iter().filter(|n| **n == 3).count(), 1);
    wait_quiescent(&sched);
    assert_eq!(sched.current_primary_count(), 3);

    let trace = sched.schedule_trace().unwrap();
    assert!(trace.events.contains(&SchedEvent::Reconfigured {
        round: 1,
        primaries: 3,
        steps_per_primary: 2
    }));
    let rounds = trace.round_starts();
    assert_eq!(rounds[0], (1, vec![t(0)], vec![0]));
    assert_eq!(
        rounds[1],
        (2, vec![t(1), t(2), t(3)], vec![0, 1, 2, 0, 1, 2])
    );
    assert_eq!(rounds[2].1, vec![t(4), t(5), t(6)]);

    let round2: Vec<_> = trace
        .turns()
        .into_iter()
        .filter(|(round, _, _)| *round == 2)
        .collect();
    assert_eq!(
        round2,
        vec![
            (2, t(1), 0),
            (2, t(2), 1),
            (2, t(3), 2),
            (2, t(1), 0),
            (2, t(2), 1),
            (2, t(3), 2)
        ]
    );
}

/// The live configuration of the running round is unaffected by a request.
#[test]
fn request_waits_for_round_boundary() {
    init_test_tracing();
    let sched = Scheduler::new(Config {
        primaries: 2,
        steps_per_primary: 2,
        ..Default::default()
    })
    .unwrap();
    let (tx, rx) = mpsc::channel();
    let gate = Gate::new();
    sched
        .submit(
            move |me| {
                let staged = me.request_reconfiguration_steps(5).unwrap();
                let summary = me.scheduler().summary();
                tx.send((
                    staged,
                    summary.live_total_order_len,
                    summary.staged_steps_per_primary,
                ))
                .unwrap();
            },
            || {},
        )
        .unwrap();
    // Holds on to its two unused steps until the first thread reported.
    let g = gate.clone();
    sched.submit(move |_| g.wait(), || {}).unwrap();
    // Staged primaries kept at 2; the live order lost only the consumed step.
    assert_eq!(collect(&rx, 1), vec![(2, 3, 5)]);
    gate.open();
}

#[test]
fn invalid_request_is_rejected() {
    let sched = recording();
    let (tx, rx) = mpsc::channel();
    sched
        .submit(
            move |me| {
                let res = me.request_reconfiguration_primaries(0);
                tx.send(matches!(res, Err(Error::InvalidConfiguration(_))))
                    .unwrap();
            },
            || {},
        )
        .unwrap();
    assert_eq!(collect(&rx, 1), vec![true]);
    assert_eq!(sched.summary().staged_primaries, 1);
}

/// The recorded round start shows the full order even when an early primary takes its
/// turn while the round is still waiting for more threads.
#[test]
fn round_start_records_full_order() {
    let sched = recording();
    let (tx, rx) = mpsc::channel();
    sched
        .submit(
            |me| {
                me.request_reconfiguration(2, 1).unwrap();
            },
            || {},
        )
        .unwrap();
    sched
        .submit(
            move |me| {
                me.wait_for_turn();
                tx.send(me.id()).unwrap();
            },
            || {},
        )
        .unwrap();
    // Round 2 is half filled and its first step already taken.
    assert_eq!(collect(&rx, 1), vec![t(1)]);
    sched.submit(|_| {}, || {}).unwrap();
    wait_quiescent(&sched);

    let trace = sched.schedule_trace().unwrap();
    assert_eq!(
        trace.round_starts()[..2].to_vec(),
        vec![(1, vec![t(0)], vec![0]), (2, vec![t(1), t(2)], vec![0, 1])]
    );
}
