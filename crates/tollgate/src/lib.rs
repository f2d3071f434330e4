// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(
    not(all(feature = "admission", feature = "dispatch", feature = "retry", feature = "metrics")),
    expect(
        rustdoc::broken_intra_doc_links,
        reason = "too ugly to make 'live links' possible with the combination of features"
    )
)]

//! Composable interceptor chains for synchronous, thread-based services.
//!
//! A [`Chain`] is an ordered list of [`Interceptor`]s wrapping a [`Target`]. Each external call
//! creates an [`Invocation`] and walks the chain in declaration order: every interceptor either
//! calls the next position, answers on its own, or fails with a [`Fault`]. The crate ships four
//! interceptors that are typically stacked in this order:
//!
//! | Stage | Purpose |
//! |-------|---------|
//! | [`admission`] | Bounds concurrent calls with a named semaphore, with acquire timeouts, a waiter limit and forced release of stalled permits. |
//! | [`dispatch`] | Hands the rest of the chain to a worker pool, either fire-and-forget or awaiting a correlated response with a timeout. |
//! | [`retry`] | Re-invokes the rest of the chain while the result or fault matches a condition, within a per-call budget. |
//! | [`metrics`] | Records per-key latency and outcome statistics and reports them periodically to a [`Sink`][sink::Sink]. |
//!
//! Any stage may be left out, and custom interceptors are plain closures or types implementing
//! [`Interceptor`].
//!
//! # Values and faults
//!
//! Arguments, results and attributes are [`serde_json::Value`]s. A call that returns nothing
//! returns [`Value::Null`][serde_json::Value::Null], which is never confused with a failure:
//! failures are always `Err(Fault)`. Application faults are created with [`Fault::raise`] and
//! [`Fault::fatal`], carry a name used by retry conditions, and may wrap a cause.
//!
//! # Quick Start
//!
//! ```rust
//! # #[cfg(all(feature = "admission", feature = "retry", feature = "metrics"))]
//! # {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tollgate::admission::{Admission, Semaphore};
//! use tollgate::metrics::{Metrics, MetricsRegistry};
//! use tollgate::retry::{Condition, Retry};
//! use tollgate::{Chain, Execute, Fault, Invocation};
//!
//! let semaphore = Arc::new(Semaphore::new("inventory_db", 8));
//! let registry = Arc::new(MetricsRegistry::new());
//!
//! let chain = Chain::builder()
//!     .interceptor(
//!         Admission::layer(&semaphore)
//!             .acquire_timeout(Duration::from_millis(200))
//!             .build(),
//!     )
//!     .interceptor(
//!         Retry::layer()
//!             .max_retries(2)
//!             .retry_fault("unavailable", Condition::always())
//!             .build(),
//!     )
//!     .interceptor(Metrics::layer(&registry).build())
//!     .target(Execute::new(|invocation: &mut Invocation| {
//!         let sku = invocation.arguments().first().cloned().unwrap_or_default();
//!         Ok(json!({ "sku": sku, "stock": 12 }))
//!     }));
//!
//! let stock = chain.execute(Invocation::new("inventory.get").argument(json!("A-100")))?;
//!
//! assert_eq!(stock, json!({ "sku": "A-100", "stock": 12 }));
//! assert_eq!(registry.get("inventory.get").map(|record| record.count()), Some(1));
//! # }
//! # Ok::<(), tollgate::Fault>(())
//! ```
//!
//! # Logging
//!
//! Stages report through [`tracing`] events named `tollgate.*`, for example
//! `tollgate.admission.denied`, `tollgate.dispatch.timeout` and `tollgate.retry`. Install any
//! `tracing` subscriber to see them.
//!
//! # Features
//!
//! - `admission`: Enables the [`admission`] stage.
//! - `dispatch`: Enables the [`dispatch`] stage and its worker pool.
//! - `retry`: Enables the [`retry`] stage.
//! - `metrics`: Enables the [`metrics`] stage, registry and reporter.
//! - `serde`: Implements `Serialize` and `Deserialize` for the stage configuration types.
//!
//! All stages are enabled by default.

mod chain;
mod fault;
mod invocation;
mod utils;

pub mod sink;

#[cfg(any(feature = "admission", test))]
pub mod admission;

#[cfg(any(feature = "dispatch", test))]
pub mod dispatch;

#[cfg(any(feature = "retry", test))]
pub mod retry;

#[cfg(any(feature = "metrics", test))]
pub mod metrics;

pub use chain::{Chain, ChainBuilder, Execute, Interceptor, Target};
pub use fault::{ADMISSION_DENIED, ASYNC_TIMEOUT, CALL_PANICKED, DISPATCH_CLOSED, DeniedReason, Fault, FaultClass, Raised, WORKER_LOST};
pub use invocation::Invocation;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
pub(crate) mod testing;
