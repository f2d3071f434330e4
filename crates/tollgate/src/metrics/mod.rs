// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Metrics: per-key call statistics and periodic reporting.
//!
//! [`Metrics`] times the rest of the chain and records the elapsed time and the
//! [`OutcomeClass`] under a key (by default the invocation's operation) in a shared
//! [`MetricsRegistry`]. For each key the registry tracks:
//!
//! - calls that returned a value, failed with a fault, and failed fatally
//! - best, worst, total and average latency
//! - the time of the last call and of the last failed call
//!
//! A [`MetricsReporter`] flushes the registry to a [`Sink`][crate::sink::Sink] on a background
//! thread, per key, ranked by `average latency × calls`, or both.
//!
//! An invocation that passes through several metrics stages is recorded only by the outermost
//! one unless [`MetricsLayer::record_nested`] is enabled. The nesting depth is kept in the
//! invocation under [`METRICS_DEPTH_ATTRIBUTE`].
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use tollgate::metrics::{Metrics, MetricsRegistry};
//! use tollgate::{Chain, Execute, Invocation};
//!
//! let registry = Arc::new(MetricsRegistry::new());
//!
//! let chain = Chain::builder()
//!     .interceptor(Metrics::layer(&registry).build())
//!     .target(Execute::new(|_: &mut Invocation| Ok(json!(42))));
//!
//! chain.execute(Invocation::new("answer"))?;
//!
//! assert_eq!(registry.get("answer").map(|record| record.count()), Some(1));
//! # Ok::<(), tollgate::Fault>(())
//! ```

mod config;
mod output;
mod record;
mod registry;
mod reporter;

use std::sync::Arc;
use std::time::Instant;

pub use config::{DEFAULT_FLUSH_INTERVAL, MetricsConfig};
pub use output::{MetricField, OutputMode};
pub use record::{MetricsRecord, OutcomeClass};
pub use registry::MetricsRegistry;
pub use reporter::{MetricsReporter, MetricsReporterBuilder};
use serde_json::Value;

use crate::utils::define_fn_wrapper;
use crate::{Chain, Fault, Interceptor, Invocation};

/// Invocation attribute holding how many metrics stages are currently measuring the call.
pub const METRICS_DEPTH_ATTRIBUTE: &str = "tollgate.metrics.depth";

define_fn_wrapper!(KeyFn(Fn(invocation: &Invocation) -> String));

/// Interceptor that records the latency and outcome of the rest of the chain.
///
/// Created through [`Metrics::layer`]; see the [module documentation][self] for details.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Arc<MetricsRegistry>,
    key: Option<KeyFn>,
    record_nested: bool,
}

impl Metrics {
    /// Starts configuring a metrics stage that records into `registry`.
    #[must_use]
    pub fn layer(registry: &Arc<MetricsRegistry>) -> MetricsLayer {
        MetricsLayer {
            registry: Arc::clone(registry),
            key: None,
            record_nested: false,
        }
    }

    /// Returns the registry this stage records into.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    fn key(&self, invocation: &Invocation) -> String {
        self.key
            .as_ref()
            .map_or_else(|| invocation.operation().to_owned(), |key| key.call(invocation))
    }
}

impl Interceptor for Metrics {
    fn invoke(&self, invocation: &mut Invocation, next: &Chain) -> Result<Value, Fault> {
        let depth = invocation.counter(METRICS_DEPTH_ATTRIBUTE);
        if depth > 0 && !self.record_nested {
            return next.proceed(invocation);
        }

        let key = self.key(invocation);
        invocation.set_counter(METRICS_DEPTH_ATTRIBUTE, depth + 1);

        let start = Instant::now();
        let outcome = next.proceed(invocation);
        let elapsed = start.elapsed();

        invocation.set_counter(METRICS_DEPTH_ATTRIBUTE, depth);
        self.registry.record(&key, elapsed, OutcomeClass::of(&outcome));
        outcome
    }
}

/// Builder for [`Metrics`], created by [`Metrics::layer`].
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    registry: Arc<MetricsRegistry>,
    key: Option<KeyFn>,
    record_nested: bool,
}

impl MetricsLayer {
    /// Derives the metrics key from the invocation.
    ///
    /// **Default**: the invocation's operation.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tollgate::metrics::{Metrics, MetricsRegistry};
    ///
    /// let registry = Arc::new(MetricsRegistry::new());
    /// let metrics = Metrics::layer(&registry)
    ///     .key(|invocation| format!("{}/{}", invocation.operation(), invocation.arguments().len()))
    ///     .build();
    /// # let _ = metrics;
    /// ```
    #[must_use]
    pub fn key(mut self, key: impl Fn(&Invocation) -> String + Send + Sync + 'static) -> Self {
        self.key = Some(KeyFn::new(key));
        self
    }

    /// Also records calls already measured by an enclosing metrics stage.
    ///
    /// **Default**: `false`
    #[must_use]
    pub fn record_nested(mut self, record_nested: bool) -> Self {
        self.record_nested = record_nested;
        self
    }

    /// Applies the nesting setting from `config`.
    #[must_use]
    pub fn config(mut self, config: &MetricsConfig) -> Self {
        self.record_nested = config.record_nested;
        self
    }

    /// Completes the configuration.
    #[must_use]
    pub fn build(self) -> Metrics {
        Metrics {
            registry: self.registry,
            key: self.key,
            record_nested: self.record_nested,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::Execute;
    use crate::testing::Scripted;

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(Metrics: Send, Sync, Clone, std::fmt::Debug);
    }

    #[test]
    fn records_outcomes_by_class() {
        let registry = Arc::new(MetricsRegistry::new());
        let chain = Chain::builder()
            .interceptor(Metrics::layer(&registry).build())
            .target(Scripted::new([
                Ok(json!(1)),
                Err(Fault::raise("bad", "input").into()),
                Err(Fault::fatal("crash", "bug").into()),
            ]));

        for _ in 0..3 {
            let _ = chain.execute(Invocation::new("op"));
        }

        let record = registry.get("op").unwrap();
        assert_eq!(record.count(), 1);
        assert_eq!(record.fault_count(), 1);
        assert_eq!(record.error_count(), 1);
        assert!(record.last_fault_time().is_some());
    }

    #[test]
    fn measures_elapsed_time() {
        let registry = Arc::new(MetricsRegistry::new());
        let chain = Chain::builder()
            .interceptor(Metrics::layer(&registry).build())
            .target(Execute::new(|_: &mut Invocation| {
                thread::sleep(Duration::from_millis(20));
                Ok(Value::Null)
            }));

        chain.execute(Invocation::new("slow")).unwrap();

        let record = registry.get("slow").unwrap();
        assert!(record.best_latency().unwrap() >= Duration::from_millis(20));
    }

    #[test]
    fn custom_key() {
        let registry = Arc::new(MetricsRegistry::new());
        let chain = Chain::builder()
            .interceptor(
                Metrics::layer(&registry)
                    .key(|invocation| format!("{}:{}", invocation.operation(), invocation.arguments().len()))
                    .build(),
            )
            .target(Scripted::new([Ok(json!(1))]));

        chain.execute(Invocation::new("add").argument(json!(1)).argument(json!(2))).unwrap();

        assert!(registry.get("add:2").is_some());
        assert!(registry.get("add").is_none());
    }

    #[test]
    fn nested_stage_not_double_counted() {
        let registry = Arc::new(MetricsRegistry::new());
        let chain = Chain::builder()
            .interceptor(Metrics::layer(&registry).key(|_| "outer".to_owned()).build())
            .interceptor(Metrics::layer(&registry).key(|_| "inner".to_owned()).build())
            .target(Scripted::new([Ok(json!(1))]));

        let mut invocation = Invocation::new("op");
        chain.proceed(&mut invocation).unwrap();

        assert!(registry.get("outer").is_some());
        assert!(registry.get("inner").is_none());
        assert_eq!(invocation.counter(METRICS_DEPTH_ATTRIBUTE), 0);
    }

    #[test]
    fn nested_stage_recorded_when_enabled() {
        let registry = Arc::new(MetricsRegistry::new());
        let chain = Chain::builder()
            .interceptor(Metrics::layer(&registry).key(|_| "outer".to_owned()).build())
            .interceptor(
                Metrics::layer(&registry)
                    .key(|_| "inner".to_owned())
                    .config(&MetricsConfig {
                        record_nested: true,
                        ..MetricsConfig::default()
                    })
                    .build(),
            )
            .target(Scripted::new([Ok(json!(1))]));

        chain.execute(Invocation::new("op")).unwrap();

        assert!(registry.get("outer").is_some());
        assert!(registry.get("inner").is_some());
    }
}
