//! End-to-end runtime behavior.
//!
//! Covers:
//! - fiber spawn, join, and typed result retrieval
//! - panic containment: one fiber's panic never takes down a carrier
//! - interruption of a parked fiber
//! - strand uniformity: fibers and dedicated threads share the handle type
//! - single-assignment dataflow values with mixed fiber/thread waiters
//! - monitor callbacks over a full suspend/resume cycle
//! - suspendability classification gating `spawn_classified`
//! - runtime stats draining to zero after the workload completes

mod common;
use common::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibra::channel::Channel;
use fibra::error::{GetError, JoinError, RecvError, SetError, SpawnError};
use fibra::monitor::CountingMonitor;
use fibra::suspend::{Marking, SuspendGraph};
use fibra::time::sleep;
use fibra::{block_on, spawn_thread, DelayedVal, FiberRuntime};

#[test]
fn fiber_value_round_trip() {
    init_test("fiber_value_round_trip");
    let rt = test_runtime();

    let handle = rt.spawn(async {
        sleep(Duration::from_millis(5)).await;
        6 * 7
    });

    let value = handle.get_blocking().expect("fiber failed");
    assert_with_log!(value == 42, "fiber result", 42, value);

    test_complete!("fiber_value_round_trip");
}

#[test]
fn panics_are_contained_per_fiber() {
    init_test("panics_are_contained_per_fiber");
    let rt = test_runtime();

    let bad = rt.spawn(async {
        panic!("deliberate failure");
    });
    let good = rt.spawn(async {
        sleep(Duration::from_millis(10)).await;
        "survived"
    });

    let err = bad.get_blocking().expect_err("panic must surface");
    match err {
        JoinError::Panicked(payload) => {
            assert_with_log!(
                payload.message().contains("deliberate failure"),
                "panic payload carries the message",
                "deliberate failure",
                payload.message()
            );
        }
        other => panic!("expected Panicked, got {other:?}"),
    }

    // The carrier that ran the panicking fiber keeps serving others.
    let value = good.get_blocking().expect("healthy fiber failed");
    assert_with_log!(value == "survived", "healthy fiber result", "survived", value);

    test_complete!("panics_are_contained_per_fiber");
}

#[test]
fn interrupt_unblocks_a_parked_fiber() {
    init_test("interrupt_unblocks_a_parked_fiber");
    let rt = test_runtime();

    let chan: Channel<u32> = Channel::unbounded();
    let rx = chan.clone();
    let handle = rt.spawn(async move { rx.recv().await });

    // Let the fiber reach the parked receive before interrupting.
    std::thread::sleep(Duration::from_millis(20));
    handle.interrupt();

    let outcome = handle.get_blocking().expect("fiber itself must not fail");
    assert_with_log!(
        outcome == Err(RecvError::Interrupted),
        "parked receive observes the interrupt",
        Err::<Option<u32>, _>(RecvError::Interrupted),
        outcome
    );

    test_complete!("interrupt_unblocks_a_parked_fiber");
}

#[test]
fn thread_and_fiber_handles_are_uniform() {
    init_test("thread_and_fiber_handles_are_uniform");
    let rt = test_runtime();

    let chan: Channel<u64> = Channel::unbounded();

    let tx = chan.clone();
    let producer = rt.spawn(async move {
        for n in 1..=4u64 {
            tx.send(n).await.expect("send failed");
        }
        tx.close();
    });

    // Same handle type, same join surface, no runtime underneath.
    let consumer = spawn_thread(async move {
        let mut total = 0u64;
        while let Some(n) = chan.recv().await.expect("recv failed") {
            total += n;
        }
        total
    });

    producer.join_blocking().expect("producer failed");
    let total = consumer.get_blocking().expect("consumer failed");
    assert_with_log!(total == 10, "thread strand consumed the full stream", 10u64, total);

    test_complete!("thread_and_fiber_handles_are_uniform");
}

#[test]
fn delayed_val_fans_out_once() {
    init_test("delayed_val_fans_out_once");
    let rt = test_runtime();

    let val: DelayedVal<u64> = DelayedVal::new();

    let mut fiber_handles = Vec::new();
    for _ in 0..3 {
        let v = val.clone();
        fiber_handles.push(rt.spawn(async move { v.get().await.expect("waiter interrupted") }));
    }
    let v = val.clone();
    let thread_handle = spawn_thread(async move { v.get().await.expect("waiter interrupted") });

    test_section!("waiters parked, now assigning");
    std::thread::sleep(Duration::from_millis(20));
    assert!(!val.is_done(), "value must not be done before set");
    val.set(99).expect("first set failed");

    let second = val.set(100);
    assert_with_log!(
        second == Err(SetError::AlreadySet),
        "second assignment is rejected",
        Err::<(), _>(SetError::AlreadySet),
        second
    );

    for handle in &fiber_handles {
        let got = handle.get_blocking().expect("fiber waiter failed");
        assert_with_log!(got == 99, "fiber waiter sees the single value", 99u64, got);
    }
    let got = thread_handle.get_blocking().expect("thread waiter failed");
    assert_with_log!(got == 99, "thread waiter sees the single value", 99u64, got);

    assert_eq!(val.try_get(), Some(99));
    assert_eq!(
        block_on(val.get_timeout(Duration::from_millis(5))),
        Ok(99),
        "get after set completes without waiting"
    );

    test_complete!("delayed_val_fans_out_once", waiters = fiber_handles.len() + 1);
}

#[test]
fn delayed_val_timeout_before_assignment() {
    init_test("delayed_val_timeout_before_assignment");

    let val: DelayedVal<u8> = DelayedVal::new();
    let got = block_on(val.get_timeout(Duration::from_millis(20)));
    assert_with_log!(
        got == Err(GetError::Timeout),
        "unset value times out",
        Err::<u8, _>(GetError::Timeout),
        got
    );

    test_complete!("delayed_val_timeout_before_assignment");
}

#[test]
fn monitor_observes_suspension_cycle() {
    init_test("monitor_observes_suspension_cycle");

    let monitor = Arc::new(CountingMonitor::new());
    let rt = FiberRuntime::builder()
        .carriers(2)
        .thread_name("fibra-test")
        .monitor(monitor.clone())
        .build();

    let handle = rt.spawn(async {
        sleep(Duration::from_millis(10)).await;
        sleep(Duration::from_millis(10)).await;
    });
    handle.join_blocking().expect("fiber failed");

    assert_with_log!(monitor.started() == 1, "one fiber started", 1u64, monitor.started());
    assert_with_log!(
        monitor.terminated() == 1,
        "one fiber terminated",
        1u64,
        monitor.terminated()
    );
    assert_with_log!(
        monitor.suspended() >= 2,
        "two sleeps suspend at least twice",
        2u64,
        monitor.suspended()
    );
    assert_with_log!(
        monitor.resumed() >= 2,
        "each suspension is matched by a resume",
        2u64,
        monitor.resumed()
    );

    test_complete!(
        "monitor_observes_suspension_cycle",
        suspended = monitor.suspended(),
        resumed = monitor.resumed()
    );
}

#[test]
fn classification_gates_entry() {
    init_test("classification_gates_entry");
    let rt = test_runtime();

    let mut graph = SuspendGraph::new();
    graph.register("park_on_mailbox", Marking::Suspendable, &[]);
    graph.register("format_report", Marking::NonSuspendable, &[]);
    // Derived promotion: suspendable because it calls a suspendable callee.
    graph.register(
        "serve_loop",
        Marking::Derived,
        &["format_report", "park_on_mailbox"],
    );
    graph.classify().expect("classification failed");

    let descriptor = graph
        .descriptor_by_name("serve_loop")
        .expect("descriptor missing");
    assert!(descriptor.is_suspendable());
    assert_with_log!(
        descriptor.call_sites() == [false, true],
        "only the suspendable call site may yield",
        [false, true],
        descriptor.call_sites()
    );

    let accepted = rt
        .spawn_classified(&graph, "serve_loop", async { 1u32 })
        .expect("suspendable entrypoint rejected");
    assert_eq!(accepted.get_blocking(), Ok(1));

    let err = rt
        .spawn_classified(&graph, "format_report", async { 2u32 })
        .map(|_| ())
        .expect_err("pinned entrypoint accepted");
    assert!(matches!(err, SpawnError::NotSuspendable(_)));

    let err = rt
        .spawn_classified(&graph, "no_such_callable", async { 3u32 })
        .map(|_| ())
        .expect_err("unknown entrypoint accepted");
    assert!(matches!(err, SpawnError::Unknown(_)));

    test_complete!("classification_gates_entry");
}

#[test]
fn stats_drain_to_zero_after_workload() {
    init_test("stats_drain_to_zero_after_workload");
    let rt = test_runtime();

    let done = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let done = Arc::clone(&done);
            rt.spawn(async move {
                sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();
    for handle in &handles {
        handle.join_blocking().expect("fiber failed");
    }
    assert_eq!(done.load(Ordering::Relaxed), 8);

    // Termination accounting trails the join by one state transition.
    let drained = wait_until(Duration::from_secs(2), || {
        let stats = rt.stats();
        stats.active_fibers == 0 && stats.suspended_fibers == 0
    });
    let stats = rt.stats();
    assert_with_log!(
        drained,
        "runtime stats drain to zero",
        (0usize, 0usize),
        (stats.active_fibers, stats.suspended_fibers)
    );

    test_complete!("stats_drain_to_zero_after_workload");
}
