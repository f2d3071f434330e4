// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};

use super::config::DEFAULT_FLUSH_INTERVAL;
use super::output::Output;
use super::{MetricField, MetricsConfig, MetricsRegistry, OutputMode};
use crate::sink::{Sink, TracingSink};

/// Background thread that periodically emits the records of a [`MetricsRegistry`] to a
/// [`Sink`].
///
/// Each flush takes a snapshot of all keys, renders the configured views and emits one record
/// per key and view. A failing sink never stops the reporter: failures are logged and counted
/// in [`sink_failures`][Self::sink_failures].
///
/// Stopping the reporter, through [`shutdown`][Self::shutdown] or by dropping it, performs a
/// final flush so the last values are observable.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tollgate::metrics::{MetricsRegistry, MetricsReporter, OutcomeClass};
/// use tollgate::sink::MemorySink;
///
/// let registry = Arc::new(MetricsRegistry::new());
/// let sink = MemorySink::new();
/// let reporter = MetricsReporter::builder(&registry)
///     .sink(sink.clone())
///     .interval(Duration::from_secs(30))
///     .start()?;
///
/// registry.record("orders.create", Duration::from_millis(12), OutcomeClass::Normal);
/// reporter.shutdown();
///
/// assert_eq!(sink.records().len(), 1);
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct MetricsReporter {
    shared: Arc<Shared>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    registry: Arc<MetricsRegistry>,
    sink: Arc<dyn Sink>,
    output: Output,
    reset_on_flush: bool,
    flushes: AtomicU64,
    sink_failures: AtomicU64,
}

impl Shared {
    fn flush(&self) -> usize {
        let snapshot = if self.reset_on_flush {
            self.registry.drain()
        } else {
            self.registry.snapshot()
        };
        let keys = snapshot.len();
        let records = self.output.render(snapshot);

        let mut emitted = 0;
        for record in &records {
            match self.sink.emit(record) {
                Ok(()) => emitted += 1,
                Err(error) => {
                    self.sink_failures.fetch_add(1, Ordering::AcqRel);
                    tracing::event!(
                        name: "tollgate.sink.failed",
                        tracing::Level::WARN,
                        sink.error = %error,
                        sink.failures = self.sink_failures.load(Ordering::Acquire),
                    );
                }
            }
        }

        self.flushes.fetch_add(1, Ordering::AcqRel);
        tracing::event!(
            name: "tollgate.metrics.flush",
            tracing::Level::DEBUG,
            metrics.keys = keys,
            metrics.records = records.len(),
            metrics.emitted = emitted,
            metrics.reset = self.reset_on_flush,
        );
        emitted
    }
}

impl MetricsReporter {
    /// Starts configuring a reporter for `registry`.
    #[must_use]
    pub fn builder(registry: &Arc<MetricsRegistry>) -> MetricsReporterBuilder {
        MetricsReporterBuilder {
            registry: Arc::clone(registry),
            sink: Arc::new(TracingSink::new()),
            interval: Some(DEFAULT_FLUSH_INTERVAL),
            reset_on_flush: false,
            output: Output::default(),
        }
    }

    /// Returns the registry being reported.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.shared.registry
    }

    /// Flushes on the calling thread and returns the number of records the sink accepted.
    pub fn flush_now(&self) -> usize {
        self.shared.flush()
    }

    /// Returns the number of completed flushes, periodic and manual.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.shared.flushes.load(Ordering::Acquire)
    }

    /// Returns the number of records the sink rejected.
    #[must_use]
    pub fn sink_failures(&self) -> u64 {
        self.shared.sink_failures.load(Ordering::Acquire)
    }

    /// Stops the reporter thread after a final flush and waits for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.stop.take());

        if let Some(handle) = self.handle.take() {
            // A panicking sink already reported itself through the panic hook.
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared, stop: &Receiver<()>, interval: Option<Duration>) {
    let ticker = interval.map_or_else(crossbeam_channel::never, crossbeam_channel::tick);

    loop {
        select! {
            recv(ticker) -> _ => {
                shared.flush();
            }
            recv(stop) -> _ => break,
        }
    }

    shared.flush();
}

/// Builder for [`MetricsReporter`], created by [`MetricsReporter::builder`].
#[derive(Debug)]
pub struct MetricsReporterBuilder {
    registry: Arc<MetricsRegistry>,
    sink: Arc<dyn Sink>,
    interval: Option<Duration>,
    reset_on_flush: bool,
    output: Output,
}

impl MetricsReporterBuilder {
    /// Sets the destination of emitted records.
    ///
    /// **Default**: [`TracingSink`].
    #[must_use]
    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Sets the time between periodic flushes. A zero interval disables them.
    ///
    /// **Default**: [`DEFAULT_FLUSH_INTERVAL`][super::DEFAULT_FLUSH_INTERVAL].
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Clears the records after each flush, so every flush reports one interval.
    ///
    /// **Default**: `false`; records accumulate for the lifetime of the registry.
    #[must_use]
    pub fn reset_on_flush(mut self, reset: bool) -> Self {
        self.reset_on_flush = reset;
        self
    }

    /// Sets the views emitted by each flush.
    ///
    /// **Default**: [`OutputMode::PerKey`].
    #[must_use]
    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output.mode = mode;
        self
    }

    /// Selects the fields emitted for each key, in order. An empty selection emits every field.
    ///
    /// **Default**: every field.
    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = MetricField>) -> Self {
        self.output.fields = fields.into_iter().collect();
        if self.output.fields.is_empty() {
            self.output.fields = MetricField::ALL.to_vec();
        }
        self
    }

    /// Limits the ranked view to the `limit` highest scoring keys. Zero removes the limit.
    ///
    /// **Default**: every key.
    #[must_use]
    pub fn ranked_limit(mut self, limit: usize) -> Self {
        self.output.ranked_limit = (limit > 0).then_some(limit);
        self
    }

    /// Applies the interval, reset and output settings from `config`.
    #[must_use]
    pub fn config(mut self, config: &MetricsConfig) -> Self {
        self.interval = config.interval();
        self.reset_on_flush = config.reset_on_flush;
        self.output = config.output();
        self
    }

    /// Starts the reporter thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(self) -> io::Result<MetricsReporter> {
        let shared = Arc::new(Shared {
            registry: self.registry,
            sink: self.sink,
            output: self.output,
            reset_on_flush: self.reset_on_flush,
            flushes: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        });
        let (stop, stopped) = crossbeam_channel::bounded(0);
        let interval = self.interval;

        let handle = thread::Builder::new().name("tollgate-metrics".to_owned()).spawn({
            let shared = Arc::clone(&shared);
            move || run(&shared, &stopped, interval)
        })?;

        Ok(MetricsReporter {
            shared,
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::time::Instant;

    use serde_json::json;

    use super::*;
    use crate::metrics::OutcomeClass;
    use crate::sink::{MemorySink, Record, SinkError};

    #[derive(Debug)]
    struct Rejecting;

    impl Sink for Rejecting {
        fn emit(&self, _record: &Record) -> Result<(), SinkError> {
            Err(SinkError::new("offline"))
        }
    }

    fn registry_with_calls() -> Arc<MetricsRegistry> {
        let registry = Arc::new(MetricsRegistry::new());
        registry.record("a", Duration::from_millis(2), OutcomeClass::Normal);
        registry.record("b", Duration::from_millis(4), OutcomeClass::Fault);
        registry
    }

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(MetricsReporter: Send, Sync, std::fmt::Debug);
    }

    #[test]
    fn flush_now_emits_per_key() {
        let sink = MemorySink::new();
        let reporter = MetricsReporter::builder(&registry_with_calls())
            .sink(sink.clone())
            .interval(Duration::ZERO)
            .fields([MetricField::Count])
            .start()
            .unwrap();

        assert_eq!(reporter.flush_now(), 2);

        let records: Vec<_> = sink.take().iter().map(Record::to_json).collect();
        assert_eq!(
            records,
            [
                json!({ "view": "per_key", "key": "a", "count": 1 }),
                json!({ "view": "per_key", "key": "b", "count": 0 }),
            ]
        );
        assert_eq!(reporter.flushes(), 1);
    }

    #[test]
    fn reset_on_flush_reports_intervals() {
        let sink = MemorySink::new();
        let registry = registry_with_calls();
        let reporter = MetricsReporter::builder(&registry)
            .sink(sink.clone())
            .interval(Duration::ZERO)
            .reset_on_flush(true)
            .start()
            .unwrap();

        assert_eq!(reporter.flush_now(), 2);
        assert_eq!(reporter.flush_now(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn accumulates_without_reset() {
        let registry = registry_with_calls();
        let reporter = MetricsReporter::builder(&registry)
            .sink(MemorySink::new())
            .interval(Duration::ZERO)
            .start()
            .unwrap();

        assert_eq!(reporter.flush_now(), 2);
        assert_eq!(reporter.flush_now(), 2);
        assert_eq!(reporter.registry().len(), 2);
    }

    #[test]
    fn sink_failures_counted_not_propagated() {
        let reporter = MetricsReporter::builder(&registry_with_calls())
            .sink(Rejecting)
            .interval(Duration::ZERO)
            .start()
            .unwrap();

        assert_eq!(reporter.flush_now(), 0);
        assert_eq!(reporter.sink_failures(), 2);
    }

    #[test]
    fn periodic_flush() {
        let sink = MemorySink::new();
        let reporter = MetricsReporter::builder(&registry_with_calls())
            .sink(sink.clone())
            .interval(Duration::from_millis(20))
            .start()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reporter.flushes() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(reporter.flushes() >= 2);
        assert!(sink.records().len() >= 4);
    }

    #[test]
    fn drop_performs_final_flush() {
        let sink = MemorySink::new();
        let registry = Arc::new(MetricsRegistry::new());
        let reporter = MetricsReporter::builder(&registry)
            .sink(sink.clone())
            .output(OutputMode::Ranked)
            .start()
            .unwrap();

        registry.record("late", Duration::from_millis(1), OutcomeClass::Normal);
        drop(reporter);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("rank"), Some(&json!(1)));
    }
}
