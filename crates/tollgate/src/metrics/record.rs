// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use jiff::Timestamp;
use serde_json::Value;

use crate::{Fault, FaultClass};

/// How a measured call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeClass {
    /// The call returned a value.
    Normal,
    /// The call failed with a fault of class [`FaultClass::Fault`].
    Fault,
    /// The call failed with a fault of class [`FaultClass::Fatal`].
    Fatal,
}

impl OutcomeClass {
    /// Classifies a call outcome.
    #[must_use]
    pub fn of(outcome: &Result<Value, Fault>) -> Self {
        match outcome {
            Ok(_) => Self::Normal,
            Err(fault) => match fault.class() {
                FaultClass::Fault => Self::Fault,
                FaultClass::Fatal => Self::Fatal,
            },
        }
    }
}

/// Running statistics for one metrics key.
///
/// Every recorded call counts in exactly one of [`count`][Self::count],
/// [`fault_count`][Self::fault_count] and [`error_count`][Self::error_count]. Latency is sampled
/// for every call regardless of its outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsRecord {
    count: u64,
    fault_count: u64,
    error_count: u64,
    samples: u64,
    total_nanos: u128,
    best: Option<Duration>,
    worst: Option<Duration>,
    last_time: Option<Timestamp>,
    last_fault_time: Option<Timestamp>,
}

impl MetricsRecord {
    /// Folds one call into the statistics.
    pub fn record(&mut self, elapsed: Duration, outcome: OutcomeClass, now: Timestamp) {
        match outcome {
            OutcomeClass::Normal => self.count += 1,
            OutcomeClass::Fault => self.fault_count += 1,
            OutcomeClass::Fatal => self.error_count += 1,
        }

        if outcome != OutcomeClass::Normal {
            self.last_fault_time = Some(now);
        }

        self.samples += 1;
        self.total_nanos += elapsed.as_nanos();
        self.best = Some(self.best.map_or(elapsed, |best| best.min(elapsed)));
        self.worst = Some(self.worst.map_or(elapsed, |worst| worst.max(elapsed)));
        self.last_time = Some(now);
    }

    /// Calls that returned a value.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Calls that failed with a recoverable fault.
    #[must_use]
    pub fn fault_count(&self) -> u64 {
        self.fault_count
    }

    /// Calls that failed with a fatal fault.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// All recorded calls.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.count + self.fault_count + self.error_count
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Shortest observed latency.
    #[must_use]
    pub fn best_latency(&self) -> Option<Duration> {
        self.best
    }

    /// Longest observed latency.
    #[must_use]
    pub fn worst_latency(&self) -> Option<Duration> {
        self.worst
    }

    /// Sum of all observed latencies.
    #[must_use]
    pub fn total_latency(&self) -> Duration {
        saturating_nanos(self.total_nanos)
    }

    /// Mean latency, truncated to whole nanoseconds.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        (self.samples > 0).then(|| saturating_nanos(self.total_nanos / u128::from(self.samples)))
    }

    /// Time of the most recent call.
    #[must_use]
    pub fn last_time(&self) -> Option<Timestamp> {
        self.last_time
    }

    /// Time of the most recent failed call.
    #[must_use]
    pub fn last_fault_time(&self) -> Option<Timestamp> {
        self.last_fault_time
    }

    /// Ranking score: average latency in nanoseconds multiplied by the number of calls.
    #[must_use]
    pub fn score(&self) -> u128 {
        self.average_latency()
            .map_or(0, |average| average.as_nanos().saturating_mul(u128::from(self.invocations())))
    }
}

fn saturating_nanos(nanos: u128) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
