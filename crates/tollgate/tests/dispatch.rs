// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(feature = "dispatch")]
#![allow(missing_docs, reason = "This is a test module")]

//! Integration tests for asynchronous dispatch using only public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use rstest::rstest;
use serde_json::{Value, json};
use tollgate::dispatch::{Dispatch, DispatchConfig, OnTimeout, WorkerPool};
use tollgate::{CALL_PANICKED, Chain, Execute, Fault, FaultClass, Invocation};

fn sequence_of(invocation: &Invocation) -> u64 {
    invocation.arguments().first().and_then(Value::as_u64).unwrap_or(u64::MAX)
}

/// A target that, for the operation named `blocked`, signals `entered` and then waits for
/// `release` before answering; every other operation echoes its name.
#[expect(clippy::panic, reason = "simulates a call that panics on the worker")]
fn gated_target(
    entered: Sender<()>,
    release: Receiver<()>,
    panic_when_released: bool,
) -> Execute<impl Fn(&mut Invocation) -> Result<Value, Fault> + Clone> {
    Execute::new(move |invocation: &mut Invocation| -> Result<Value, Fault> {
        if invocation.operation() == "blocked" {
            entered.send(()).map_err(|_closed| Fault::WorkerLost)?;
            release.recv().map_err(|_closed| Fault::WorkerLost)?;
            if panic_when_released {
                panic!("ledger corrupted");
            }
        }
        Ok(json!(invocation.operation()))
    })
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn single_worker_processes_in_fifo_order() {
    let pool = Arc::new(WorkerPool::new("fifo", 1).unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let chain = {
        let seen = Arc::clone(&seen);
        Chain::builder()
            .interceptor(Dispatch::layer(&pool).build())
            .target(Execute::new(move |invocation: &mut Invocation| {
                seen.lock().push(sequence_of(invocation));
                Ok(Value::Null)
            }))
    };

    for sequence in 0..100_u64 {
        let invocation = Invocation::new("ordered").argument(json!(sequence));
        assert_eq!(chain.execute(invocation), Ok(Value::Null));
    }
    pool.shutdown();

    assert_eq!(*seen.lock(), (0..100).collect::<Vec<u64>>());
    assert_eq!(pool.completed(), 100);
}

#[rstest]
#[case(2)]
#[case(4)]
#[case(8)]
fn many_workers_complete_each_envelope_once(#[case] workers: usize) {
    let pool = Arc::new(WorkerPool::new("parallel", workers).unwrap());
    let completions = Arc::new(Mutex::new(HashMap::<u64, usize>::new()));

    let chain = {
        let completions = Arc::clone(&completions);
        Chain::builder()
            .interceptor(Dispatch::layer(&pool).build())
            .target(Execute::new(move |invocation: &mut Invocation| {
                *completions.lock().entry(sequence_of(invocation)).or_default() += 1;
                Ok(Value::Null)
            }))
    };

    let producers: Vec<_> = (0..4_u64)
        .map(|producer| {
            let chain = chain.clone();
            thread::spawn(move || {
                for index in 0..250_u64 {
                    let invocation = Invocation::new("spread").argument(json!(producer * 250 + index));
                    chain.execute(invocation).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    pool.shutdown();

    let completions = completions.lock();
    assert_eq!(completions.len(), 1_000);
    assert!(completions.values().all(|count| *count == 1));
    assert_eq!(pool.completed(), 1_000);
}

#[rstest]
#[case(OnTimeout::Fail, Err(Fault::AsyncTimeout { timeout: Duration::from_millis(100) }))]
#[case(OnTimeout::Sentinel, Ok(Value::Null))]
fn slow_worker_times_out_promptly(#[case] on_timeout: OnTimeout, #[case] expected: Result<Value, Fault>) {
    let pool = Arc::new(WorkerPool::new("slow", 1).unwrap());
    let chain = Chain::builder()
        .interceptor(
            Dispatch::layer(&pool)
                .await_response(Some(Duration::from_millis(100)))
                .on_timeout(on_timeout)
                .build(),
        )
        .target(Execute::new(|_: &mut Invocation| {
            thread::sleep(Duration::from_millis(2_000));
            Ok(json!("too late"))
        }));

    let start = Instant::now();
    let outcome = chain.execute(Invocation::new("slow"));
    let elapsed = start.elapsed();

    assert_eq!(outcome, expected);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1_000), "took {elapsed:?}");
}

#[test]
fn panicking_call_does_not_strand_queued_callers() {
    let pool = Arc::new(WorkerPool::new("panics", 1).unwrap());
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let chain = Chain::builder()
        .interceptor(Dispatch::layer(&pool).await_response(None).build())
        .target(gated_target(entered_tx, release_rx, true));

    let blocked = {
        let chain = chain.clone();
        thread::spawn(move || chain.execute(Invocation::new("blocked")))
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let queued = {
        let chain = chain.clone();
        thread::spawn(move || chain.execute(Invocation::new("queued")))
    };
    wait_until(|| pool.queued() == 1);
    release_tx.send(()).unwrap();

    let fault = blocked.join().unwrap().unwrap_err();
    assert_eq!(fault.name(), CALL_PANICKED);
    assert_eq!(fault.class(), FaultClass::Fatal);
    assert_eq!(fault.properties()["message"], json!("ledger corrupted"));
    assert_eq!(queued.join().unwrap(), Ok(json!("queued")));

    assert_eq!(pool.live_workers(), 1);
    assert!(!pool.is_closed());
    assert_eq!(chain.execute(Invocation::new("later")), Ok(json!("later")));
    pool.shutdown();
    assert_eq!(pool.completed(), 3);
}

#[rstest]
#[case(OnTimeout::Fail, Err(Fault::AsyncTimeout { timeout: Duration::from_millis(100) }))]
#[case(OnTimeout::Sentinel, Ok(Value::Null))]
fn full_queue_counts_against_timeout(#[case] on_timeout: OnTimeout, #[case] expected: Result<Value, Fault>) {
    let pool = Arc::new(WorkerPool::builder("saturated").workers(1).queue_capacity(1).build().unwrap());
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let target = gated_target(entered_tx, release_rx, false);
    let fire_and_forget = Chain::builder().interceptor(Dispatch::layer(&pool).build()).target(target.clone());
    let awaited = Chain::builder()
        .interceptor(
            Dispatch::layer(&pool)
                .await_response(Some(Duration::from_millis(100)))
                .on_timeout(on_timeout)
                .build(),
        )
        .target(target);

    assert_eq!(fire_and_forget.execute(Invocation::new("blocked")), Ok(Value::Null));
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(fire_and_forget.execute(Invocation::new("filler")), Ok(Value::Null));
    assert_eq!(pool.queued(), 1);

    let start = Instant::now();
    let outcome = awaited.execute(Invocation::new("late"));
    let elapsed = start.elapsed();

    assert_eq!(outcome, expected);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1_000), "took {elapsed:?}");

    release_tx.send(()).unwrap();
    pool.shutdown();
    assert_eq!(pool.completed(), 2);
}

#[test]
fn awaited_fault_is_reraised() {
    let pool = Arc::new(WorkerPool::new("faults", 2).unwrap());
    let chain = Chain::builder()
        .interceptor(Dispatch::layer(&pool).await_response(None).build())
        .target(Execute::new(|_: &mut Invocation| {
            Err(Fault::raise("quota_exceeded", "too many requests").with_detail(json!({ "limit": 10 })).into())
        }));

    let fault = chain.execute(Invocation::new("op")).unwrap_err();

    assert_eq!(fault.name(), "quota_exceeded");
    assert_eq!(fault.properties()["detail"]["limit"], json!(10));
    pool.shutdown();
}

#[test]
fn null_result_is_not_a_fault() {
    let pool = Arc::new(WorkerPool::new("nulls", 1).unwrap());
    let chain = Chain::builder()
        .interceptor(Dispatch::layer(&pool).await_response(Some(Duration::from_secs(5))).build())
        .target(Execute::new(|_: &mut Invocation| Ok(Value::Null)));

    assert_eq!(chain.execute(Invocation::new("op")), Ok(Value::Null));
    pool.shutdown();
}

#[test]
fn worker_sees_callers_attributes() {
    let pool = Arc::new(WorkerPool::new("attributes", 1).unwrap());
    let chain = Chain::builder()
        .interceptor(|invocation: &mut Invocation, next: &Chain| {
            invocation.set_attribute("tenant", json!("contoso"));
            next.proceed(invocation)
        })
        .interceptor(Dispatch::layer(&pool).await_response(None).build())
        .target(Execute::new(|invocation: &mut Invocation| {
            Ok(json!({
                "tenant": invocation.attribute("tenant").cloned(),
                "thread": thread::current().name().map(str::to_owned),
            }))
        }));

    assert_eq!(
        chain.execute(Invocation::new("op")),
        Ok(json!({ "tenant": "contoso", "thread": "attributes-0" }))
    );
    pool.shutdown();
}

#[test]
fn pool_shared_by_two_stages() {
    let pool = Arc::new(WorkerPool::new("shared", 2).unwrap());
    let first = Chain::builder()
        .interceptor(Dispatch::layer(&pool).await_response(None).build())
        .target(Execute::new(|_: &mut Invocation| Ok(json!(1))));
    let second = Chain::builder()
        .interceptor(Dispatch::layer(&pool).await_response(None).build())
        .target(Execute::new(|_: &mut Invocation| Ok(json!(2))));

    assert_eq!(first.execute(Invocation::new("a")), Ok(json!(1)));
    assert_eq!(second.execute(Invocation::new("b")), Ok(json!(2)));

    pool.shutdown();
    assert_eq!(pool.completed(), 2);
    assert_eq!(second.execute(Invocation::new("b")), Err(Fault::DispatchClosed));
}

#[test]
fn from_config_fire_and_forget() {
    let dispatch = Dispatch::from_config(&DispatchConfig {
        name: "configured".into(),
        workers: 2,
        queue_capacity: 4,
        ..DispatchConfig::default()
    })
    .unwrap();
    let pool = Arc::clone(dispatch.pool());
    let chain = Chain::builder()
        .interceptor(dispatch)
        .target(Execute::new(|_: &mut Invocation| Ok(json!("ignored"))));

    for _ in 0..20 {
        assert_eq!(chain.execute(Invocation::new("op")), Ok(Value::Null));
    }
    pool.shutdown();

    assert_eq!(pool.queue_capacity(), 4);
    assert_eq!(pool.completed(), 20);
}
