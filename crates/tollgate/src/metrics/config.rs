// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use super::output::Output;
use super::{MetricField, OutputMode};
use crate::utils::positive_millis;

/// Default interval between metrics flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Plain configuration values for metrics collection and reporting.
///
/// A non-positive `interval_ms` disables the periodic flush; records are then emitted only
/// by [`flush_now`][super::MetricsReporter::flush_now] and at shutdown. An empty `fields`
/// list emits every field, and a zero `ranked_limit` emits every key in the ranked view.
///
/// # Examples
///
/// ```
/// use tollgate::metrics::{MetricField, MetricsConfig, OutputMode};
///
/// let config = MetricsConfig {
///     interval_ms: 10_000,
///     reset_on_flush: true,
///     output: OutputMode::Ranked,
///     fields: vec![MetricField::Count, MetricField::AverageUs],
///     ranked_limit: 10,
///     ..MetricsConfig::default()
/// };
/// # let _ = config;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MetricsConfig {
    /// Milliseconds between flushes.
    pub interval_ms: i64,
    /// Whether records are cleared after each flush.
    pub reset_on_flush: bool,
    /// Views emitted by each flush.
    pub output: OutputMode,
    /// Fields emitted for each key, in order.
    pub fields: Vec<MetricField>,
    /// Keys emitted in the ranked view.
    pub ranked_limit: usize,
    /// Whether calls already measured by an enclosing metrics stage are measured again.
    pub record_nested: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_ms: i64::try_from(DEFAULT_FLUSH_INTERVAL.as_millis()).unwrap_or(i64::MAX),
            reset_on_flush: false,
            output: OutputMode::PerKey,
            fields: Vec::new(),
            ranked_limit: 0,
            record_nested: false,
        }
    }
}

impl MetricsConfig {
    pub(crate) fn interval(&self) -> Option<Duration> {
        positive_millis(self.interval_ms)
    }

    pub(crate) fn output(&self) -> Output {
        let fields = if self.fields.is_empty() {
            MetricField::ALL.to_vec()
        } else {
            self.fields.clone()
        };

        Output {
            mode: self.output,
            fields,
            ranked_limit: (self.ranked_limit > 0).then_some(self.ranked_limit),
        }
    }
}
