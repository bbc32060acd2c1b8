#![allow(missing_docs)]
//! Cross-thread behavior: waking a parked loop, importing promises
//! between loops, eager evaluation, and the disarm barrier.

mod common;

use common::*;
use eventide::{assert_with_log, test_complete, test_section};
use eventide::{promise_and_fulfiller, EventLoop, Promise};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn a_parked_loop_wakes_when_another_thread_fulfills() {
    init_test("a_parked_loop_wakes_when_another_thread_fulfills");
    let event_loop = EventLoop::new();
    let (promise, fulfiller) = promise_and_fulfiller::<i32>();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        fulfiller.fulfill(9);
    });

    // The loop parks on the empty queue until the fulfiller wakes it.
    let value = event_loop.wait(promise).expect("value");
    handle.join().expect("fulfiller thread panicked");
    assert_with_log!(value == 9, "fulfilled value", 9, value);
    test_complete!("a_parked_loop_wakes_when_another_thread_fulfills");
}

#[test]
fn a_promise_bound_to_one_loop_is_consumable_from_another() {
    init_test("a_promise_bound_to_one_loop_is_consumable_from_another");
    let producer_loop = Arc::new(EventLoop::new());
    let (control, shutdown) = promise_and_fulfiller::<()>();

    test_section!("keep the producer loop running");
    let loop_for_thread = Arc::clone(&producer_loop);
    let driver = thread::spawn(move || {
        loop_for_thread.wait(control).expect("control resolves");
    });

    test_section!("build a promise bound to the producer loop");
    // The continuation runs on the producer loop and hands back a
    // transform bound to it; consuming that transform from the other
    // loop goes through the cross-thread adapter.
    let bound = producer_loop.eval_later_promise(|| Promise::resolved(10).then(|x| x + 1));

    let consumer_loop = EventLoop::new();
    let value = consumer_loop.wait(bound).expect("imported value");
    assert_with_log!(value == 11, "imported value", 11, value);

    shutdown.fulfill(());
    driver.join().expect("driver thread panicked");
    test_complete!("a_promise_bound_to_one_loop_is_consumable_from_another");
}

#[test]
fn eager_evaluation_runs_without_a_waiter() {
    init_test("eager_evaluation_runs_without_a_waiter");
    let event_loop = EventLoop::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let eager = event_loop.eagerly_evaluate(Promise::resolved(2).then(move |x| {
        flag.store(true, Ordering::SeqCst);
        x
    }));

    // Drive the loop with unrelated work; the eager pipeline was armed
    // first and runs during this wait.
    event_loop
        .wait(event_loop.eval_later(|| ()))
        .expect("unrelated work");
    let ran_now = ran.load(Ordering::SeqCst);
    assert_with_log!(ran_now, "continuation ran with no waiter", true, ran_now);

    let value = event_loop.wait(eager).expect("value");
    assert_with_log!(value == 2, "eager value", 2, value);
    test_complete!("eager_evaluation_runs_without_a_waiter");
}

#[test]
fn dropping_a_promise_blocks_until_its_running_continuation_finishes() {
    init_test("dropping_a_promise_blocks_until_its_running_continuation_finishes");
    let event_loop = Arc::new(EventLoop::new());
    let (control, shutdown) = promise_and_fulfiller::<()>();

    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let started_flag = Arc::clone(&started);
    let finished_flag = Arc::clone(&finished);

    // The continuation runs on the loop thread below; it signals entry,
    // dawdles, then signals completion.
    let slow = event_loop.eval_later(move || {
        started_flag.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        finished_flag.store(true, Ordering::SeqCst);
    });

    let loop_for_thread = Arc::clone(&event_loop);
    let driver = thread::spawn(move || {
        loop_for_thread.wait(control).expect("control resolves");
    });

    while !started.load(Ordering::SeqCst) {
        thread::yield_now();
    }

    test_section!("drop mid-fire");
    // The event is firing right now on the driver thread; the disarm in
    // the drop path must wait for it.
    drop(slow);
    let finished_now = finished.load(Ordering::SeqCst);
    assert_with_log!(finished_now, "drop waited for fire", true, finished_now);

    shutdown.fulfill(());
    driver.join().expect("driver thread panicked");
    test_complete!("dropping_a_promise_blocks_until_its_running_continuation_finishes");
}

#[test]
fn eval_later_calls_run_in_order_across_a_running_loop() {
    init_test("eval_later_calls_run_in_order_across_a_running_loop");
    let event_loop = EventLoop::new();
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let promises: Vec<_> = (0..4)
        .map(|i| {
            let log = Arc::clone(&log);
            event_loop.eval_later(move || log.lock().expect("log poisoned").push(i))
        })
        .collect();

    for promise in promises {
        event_loop.wait(promise).expect("step");
    }
    let order = log.lock().expect("log poisoned").clone();
    assert_with_log!(order == vec![0, 1, 2, 3], "fifo order", vec![0, 1, 2, 3], order);
    test_complete!("eval_later_calls_run_in_order_across_a_running_loop");
}
