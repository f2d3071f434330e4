// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(all(feature = "admission", feature = "dispatch", feature = "retry", feature = "metrics"))]
#![allow(missing_docs, reason = "This is a test module")]

//! End-to-end tests stacking every stage in a single chain.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};
use tollgate::admission::{Admission, Semaphore};
use tollgate::dispatch::{Dispatch, WorkerPool};
use tollgate::metrics::{Metrics, MetricsRegistry};
use tollgate::retry::{Condition, Retry};
use tollgate::{Chain, Execute, Fault, Invocation};

struct Fixture {
    semaphore: Arc<Semaphore>,
    pool: Arc<WorkerPool>,
    registry: Arc<MetricsRegistry>,
    calls: Arc<AtomicUsize>,
    chain: Chain,
}

/// Builds admission, awaited dispatch, retry on `unavailable` and metrics around a target that
/// fails its first `failures` calls.
fn fixture(failures: usize) -> Fixture {
    // Several tests share the process; only the first installs the subscriber.
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let semaphore = Arc::new(Semaphore::new("backend", 2));
    let pool = Arc::new(WorkerPool::new("backend-io", 2).unwrap());
    let registry = Arc::new(MetricsRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let chain = Chain::builder()
        .interceptor(Admission::layer(&semaphore).acquire_timeout(Duration::from_secs(5)).build())
        .interceptor(Dispatch::layer(&pool).await_response(Some(Duration::from_secs(5))).build())
        .interceptor(
            Retry::layer()
                .max_retries(2)
                .retry_fault("unavailable", Condition::always())
                .build(),
        )
        .interceptor(Metrics::layer(&registry).build())
        .target(Execute::new(move |invocation: &mut Invocation| {
            if counter.fetch_add(1, Ordering::SeqCst) < failures {
                return Err(Fault::raise("unavailable", "backend warming up").into());
            }
            let order = invocation.arguments().first().cloned().unwrap_or_default();
            Ok(json!({ "order": order, "status": "stored" }))
        }));

    Fixture {
        semaphore,
        pool,
        registry,
        calls,
        chain,
    }
}

#[test]
fn transient_faults_absorbed_end_to_end() {
    let fixture = fixture(2);

    let outcome = fixture.chain.execute(Invocation::new("orders.store").argument(json!(7)));

    assert_eq!(outcome, Ok(json!({ "order": 7, "status": "stored" })));
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 3);

    let record = fixture.registry.get("orders.store").unwrap();
    assert_eq!(record.fault_count(), 2);
    assert_eq!(record.count(), 1);
    assert_eq!(fixture.semaphore.acquired(), 0);
    fixture.pool.shutdown();
}

#[test]
fn exhausted_retries_surface_through_dispatch() {
    let fixture = fixture(usize::MAX);

    let fault = fixture.chain.execute(Invocation::new("orders.store")).unwrap_err();

    assert_eq!(fault.name(), "unavailable");
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.registry.get("orders.store").map(|record| record.fault_count()), Some(3));
    assert_eq!(fixture.semaphore.acquired(), 0);
    fixture.pool.shutdown();
}

#[test]
fn concurrent_callers_share_every_stage() {
    let fixture = fixture(0);

    let handles: Vec<_> = (0..8_u64)
        .map(|order| {
            let chain = fixture.chain.clone();
            thread::spawn(move || chain.execute(Invocation::new("orders.store").argument(json!(order))))
        })
        .collect();
    let outcomes: Vec<Result<Value, Fault>> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(fixture.registry.get("orders.store").map(|record| record.count()), Some(8));
    assert_eq!(fixture.semaphore.acquired(), 0);

    fixture.pool.shutdown();
    assert_eq!(fixture.pool.completed(), 8);
}
