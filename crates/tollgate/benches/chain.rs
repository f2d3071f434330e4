// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_docs, reason = "Benchmarks don't require documentation")]

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use tollgate::admission::{Admission, Semaphore};
use tollgate::metrics::{Metrics, MetricsRegistry};
use tollgate::retry::{Condition, Retry};
use tollgate::{Chain, Execute, Invocation};

fn entry(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    let chain = Chain::builder().target(Execute::new(|_: &mut Invocation| Ok(json!(1))));
    group.bench_function("target-only", |b| b.iter(|| chain.execute(black_box(Invocation::new("op")))));

    let chain = Chain::builder()
        .interceptor(|invocation: &mut Invocation, next: &Chain| next.proceed(invocation))
        .interceptor(|invocation: &mut Invocation, next: &Chain| next.proceed(invocation))
        .interceptor(|invocation: &mut Invocation, next: &Chain| next.proceed(invocation))
        .target(Execute::new(|_: &mut Invocation| Ok(json!(1))));
    group.bench_function("pass-through-3", |b| b.iter(|| chain.execute(black_box(Invocation::new("op")))));

    let semaphore = Arc::new(Semaphore::new("bench", 64));
    let chain = Chain::builder()
        .interceptor(Admission::layer(&semaphore).build())
        .target(Execute::new(|_: &mut Invocation| Ok(json!(1))));
    group.bench_function("admission", |b| b.iter(|| chain.execute(black_box(Invocation::new("op")))));

    let chain = Chain::builder()
        .interceptor(Retry::layer().max_retries(3).retry_result(Condition::value().lt(json!(0))).build())
        .target(Execute::new(|_: &mut Invocation| Ok(json!(1))));
    group.bench_function("retry-no-match", |b| b.iter(|| chain.execute(black_box(Invocation::new("op")))));

    let registry = Arc::new(MetricsRegistry::new());
    let chain = Chain::builder()
        .interceptor(Metrics::layer(&registry).build())
        .target(Execute::new(|_: &mut Invocation| Ok(json!(1))));
    group.bench_function("metrics", |b| b.iter(|| chain.execute(black_box(Invocation::new("op")))));

    let chain = Chain::builder()
        .interceptor(Admission::layer(&semaphore).build())
        .interceptor(Retry::layer().max_retries(3).retry_result(Condition::value().lt(json!(0))).build())
        .interceptor(Metrics::layer(&registry).build())
        .target(Execute::new(|_: &mut Invocation| Ok(json!(1))));
    group.bench_function("stacked", |b| b.iter(|| chain.execute(black_box(Invocation::new("op")))));

    group.finish();
}

criterion_group!(benches, entry);
criterion_main!(benches);
