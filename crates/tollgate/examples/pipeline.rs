// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! This example stacks every `tollgate` stage in front of a flaky inventory lookup: admission
//! bounds concurrency, dispatch moves the call onto a worker pool, retry absorbs transient faults
//! and metrics measures each attempt. A reporter prints the collected statistics at the end.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};
use tollgate::admission::{Admission, Semaphore};
use tollgate::dispatch::{Dispatch, WorkerPool};
use tollgate::metrics::{Metrics, MetricsRegistry, MetricsReporter, OutputMode};
use tollgate::retry::{Condition, Retry};
use tollgate::sink::TracingSink;
use tollgate::{Chain, Execute, Fault, Invocation};
use tracing::Level;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let semaphore = Arc::new(Semaphore::new("inventory_db", 2));
    let pool = Arc::new(WorkerPool::builder("inventory-io").workers(4).build()?);
    let registry = Arc::new(MetricsRegistry::new());
    let reporter = MetricsReporter::builder(&registry)
        .sink(TracingSink::new())
        .interval(Duration::from_millis(250))
        .output(OutputMode::Both)
        .start()?;

    let inventory = Arc::new(Inventory::default());
    let chain = Chain::builder()
        .interceptor(Admission::layer(&semaphore).acquire_timeout(Duration::from_millis(500)).build())
        .interceptor(Dispatch::layer(&pool).await_response(Some(Duration::from_secs(1))).build())
        .interceptor(
            Retry::layer()
                .max_retries(3)
                .interval(Duration::from_millis(20))
                .retry_fault("unavailable", Condition::always())
                .build(),
        )
        .interceptor(Metrics::layer(&registry).build())
        .target(Execute::new(lookup));

    let callers: Vec<_> = ["A-100", "B-200", "C-300", "A-100", "B-200", "D-400"]
        .into_iter()
        .map(|sku| {
            let chain = chain.clone();
            let invocation = Invocation::new("inventory.get")
                .target(Arc::clone(&inventory))
                .argument(json!(sku));
            thread::spawn(move || chain.execute(invocation))
        })
        .collect();

    for caller in callers {
        match caller.join() {
            Ok(Ok(stock)) => println!("stock: {stock}"),
            Ok(Err(fault)) => println!("lookup failed: {fault}"),
            Err(_panic) => println!("caller panicked"),
        }
    }

    pool.shutdown();
    reporter.shutdown();
    Ok(())
}

/// Simulated backend that is unavailable on every third request.
#[derive(Debug, Default)]
struct Inventory {
    requests: AtomicU32,
}

fn lookup(invocation: &mut Invocation) -> Result<Value, Fault> {
    let inventory = invocation
        .target_as::<Inventory>()
        .ok_or_else(|| Fault::from(Fault::fatal("no_backend", "inventory target missing")))?;

    if inventory.requests.fetch_add(1, Ordering::Relaxed) % 3 == 2 {
        return Err(Fault::raise("unavailable", "inventory replica restarting").into());
    }

    thread::sleep(Duration::from_millis(15));
    let sku = invocation.arguments().first().cloned().unwrap_or_default();
    Ok(json!({ "sku": sku, "stock": 12 }))
}
