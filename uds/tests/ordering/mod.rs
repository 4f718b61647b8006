/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Turn and lock-grant ordering.

use std::sync::mpsc;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use uds::Config;
use uds::DetLock;
use uds::SchedEvent;
use uds::Scheduler;
use uds::ThreadId;
use uds_testutils::collect;
use uds_testutils::init_test_tracing;
use uds_testutils::Gate;

fn t(n: u64) -> ThreadId {
    ThreadId::from_raw(n)
}

fn recording(primaries: usize, steps_per_primary: usize) -> Arc<Scheduler> {
    init_test_tracing();
    Scheduler::new(Config {
        primaries,
        steps_per_primary,
        record_schedule: true,
        ..Default::default()
    })
    .unwrap()
}

/// With a single primary, rounds are single file and grants follow submission order.
#[test]
fn grants_follow_submission_order() {
    let sched = recording(1, 1);
    let lock = Arc::new(DetLock::new(&sched));
    let (tx, rx) = mpsc::channel();
    for _ in 0..3 {
        let lock = lock.clone();
        let tx = tx.clone();
        sched
            .submit(
                move |me| {
                    lock.lock(me);
                    tx.send(me.id()).unwrap();
                    lock.unlock(me).unwrap();
                },
                || {},
            )
            .unwrap();
    }
    assert_eq!(collect(&rx, 3), vec![t(0), t(1), t(2)]);

    let trace = sched.schedule_trace().unwrap();
    assert_eq!(trace.lock_grants(lock.id()), vec![t(0), t(1), t(2)]);
    assert_eq!(
        trace.turns(),
        vec![(1, t(0), 0), (2, t(1), 0), (3, t(2), 0)]
    );
}

/// A precedes B in the total order, so A gets the lock first although B asked first.
#[test]
fn total_order_beats_os_scheduling() {
    let sched = recording(2, 1);
    let lock = Arc::new(DetLock::new(&sched));
    let release_a = Gate::new();
    let (tx, rx) = mpsc::channel();

    let (l, g, tx_a) = (lock.clone(), release_a.clone(), tx.clone());
    sched
        .submit(
            move |me| {
                g.wait();
                tx_a.send(format!("{} requests", me.id())).unwrap();
                l.with(me, || tx_a.send(format!("{} holds", me.id())).unwrap())
                    .unwrap();
            },
            || {},
        )
        .unwrap();
    let (l, tx_b) = (lock.clone(), tx.clone());
    sched
        .submit(
            move |me| {
                tx_b.send(format!("{} requests", me.id())).unwrap();
                l.with(me, || tx_b.send(format!("{} holds", me.id())).unwrap())
                    .unwrap();
            },
            || {},
        )
        .unwrap();

    assert_eq!(collect(&rx, 1), vec!["T1 requests".to_string()]);
    release_a.open();
    assert_eq!(
        collect(&rx, 3),
        vec![
            "T0 requests".to_string(),
            "T0 holds".to_string(),
            "T1 holds".to_string()
        ]
    );
    let trace = sched.schedule_trace().unwrap();
    assert_eq!(trace.lock_grants(lock.id()), vec![t(0), t(1)]);
    assert_eq!(trace.turns(), vec![(1, t(0), 0), (1, t(1), 1)]);
}

/// Out of steps, a primary sits out the rest of the round and is picked again next round.
#[test]
fn exhausted_primary_waits_for_next_round() {
    let sched = recording(2, 1);
    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        let tx = tx.clone();
        sched
            .submit(
                move |me| {
                    for step in 0..2 {
                        me.wait_for_turn();
                        tx.send((me.id(), step)).unwrap();
                    }
                },
                || {},
            )
            .unwrap();
    }
    collect(&rx, 4);
    let trace = sched.schedule_trace().unwrap();
    assert_eq!(
        trace.turns(),
        vec![(1, t(0), 0), (1, t(1), 1), (2, t(0), 0), (2, t(1), 1)]
    );
    assert_eq!(
        trace.round_starts()[..2].to_vec(),
        vec![
            (1, vec![t(0), t(1)], vec![0, 1]),
            (2, vec![t(0), t(1)], vec![0, 1])
        ]
    );
}

/// A unit that panics still terminates, so the next round can form.
#[test]
fn panicking_unit_releases_its_slot() {
    let sched = recording(1, 1);
    let (tx, rx) = mpsc::channel();
    sched
        .submit(|_| panic!("unit of work failed"), || unreachable!())
        .unwrap();
    sched
        .submit(
            move |me| {
                me.wait_for_turn();
                tx.send(me.scheduler().current_round_number()).unwrap();
            },
            || {},
        )
        .unwrap();
    assert_eq!(collect(&rx, 1), vec![2]);
    assert!(sched.threads_terminated_total() >= 1);
}

/// Completion callbacks run on the worker, after the work.
#[test]
fn completion_after_work() {
    let sched = recording(1, 1);
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    let tid = sched
        .fill_round(
            move |me| {
                me.wait_for_turn();
                tx.send(format!("work {}", me.id())).unwrap();
            },
            move || {
                let name = std::thread::current().name().unwrap().to_string();
                tx2.send(format!("done on {}", name)).unwrap();
            },
        )
        .unwrap();
    assert_eq!(tid, t(0));
    assert_eq!(
        collect(&rx, 2),
        vec!["work T0".to_string(), "done on uds-worker-0".to_string()]
    );
}

/// A primary queued on a lock held by a finished primary lets the round close; it asks
/// again in the next round and gets the lock once the holder releases it.
#[test]
fn queued_waiter_retries_after_round_closes() {
    let sched = recording(2, 1);
    let lock = Arc::new(DetLock::new(&sched));
    let (tx, rx) = mpsc::channel();

    let (l, tx0) = (lock.clone(), tx.clone());
    sched
        .submit(
            move |me| {
                l.lock(me);
                // Out of steps while holding the lock.
                me.wait_for_turn();
                l.unlock(me).unwrap();
                tx0.send(me.id()).unwrap();
            },
            || {},
        )
        .unwrap();
    let l = lock.clone();
    sched
        .submit(
            move |me| {
                l.lock(me);
                l.unlock(me).unwrap();
                tx.send(me.id()).unwrap();
            },
            || {},
        )
        .unwrap();
    let mut done = collect(&rx, 2);
    done.sort();
    assert_eq!(done, vec![t(0), t(1)]);

    let trace = sched.schedule_trace().unwrap();
    assert_eq!(trace.lock_grants(lock.id()), vec![t(0), t(1)]);
    assert_eq!(
        trace.round_starts()[..2].to_vec(),
        vec![
            (1, vec![t(0), t(1)], vec![0, 1]),
            (2, vec![t(0), t(1)], vec![0, 1])
        ]
    );
    assert_eq!(
        trace.turns(),
        vec![(1, t(0), 0), (1, t(1), 1), (2, t(0), 0), (2, t(1), 1)]
    );
    let second_grant = trace
        .events
        .iter()
        .find(|ev| matches!(ev, SchedEvent::LockAcquired { thread, .. } if *thread == t(1)))
        .unwrap();
    assert_eq!(second_grant.round(), 2);
}
