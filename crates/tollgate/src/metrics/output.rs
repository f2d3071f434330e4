// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde_json::Value;

use super::MetricsRecord;
use super::registry::rank;
use crate::sink::Record;

/// Which views a flush emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OutputMode {
    /// One record per key, ordered by key.
    #[default]
    PerKey,
    /// One record per key, ordered by score, highest first.
    Ranked,
    /// The per-key view followed by the ranked view.
    Both,
}

/// A statistic that can be included in emitted records.
///
/// Latencies are emitted in whole microseconds and timestamps in RFC 3339 format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MetricField {
    /// Calls that returned a value.
    Count,
    /// Calls that failed with a recoverable fault.
    FaultCount,
    /// Calls that failed with a fatal fault.
    ErrorCount,
    /// All recorded calls.
    Invocations,
    /// Shortest latency.
    BestUs,
    /// Longest latency.
    WorstUs,
    /// Mean latency.
    AverageUs,
    /// Sum of all latencies.
    TotalUs,
    /// Time of the most recent call.
    LastTime,
    /// Time of the most recent failed call.
    LastFaultTime,
    /// Ranking score in microseconds.
    Score,
}

impl MetricField {
    /// Every field, in the default output order.
    pub const ALL: [Self; 11] = [
        Self::Count,
        Self::FaultCount,
        Self::ErrorCount,
        Self::Invocations,
        Self::BestUs,
        Self::WorstUs,
        Self::AverageUs,
        Self::TotalUs,
        Self::LastTime,
        Self::LastFaultTime,
        Self::Score,
    ];

    /// The field name used in emitted records.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::FaultCount => "fault_count",
            Self::ErrorCount => "error_count",
            Self::Invocations => "invocations",
            Self::BestUs => "best_us",
            Self::WorstUs => "worst_us",
            Self::AverageUs => "average_us",
            Self::TotalUs => "total_us",
            Self::LastTime => "last_time",
            Self::LastFaultTime => "last_fault_time",
            Self::Score => "score",
        }
    }

    fn value(self, record: &MetricsRecord) -> Value {
        match self {
            Self::Count => record.count().into(),
            Self::FaultCount => record.fault_count().into(),
            Self::ErrorCount => record.error_count().into(),
            Self::Invocations => record.invocations().into(),
            Self::BestUs => record.best_latency().map(micros).into(),
            Self::WorstUs => record.worst_latency().map(micros).into(),
            Self::AverageUs => record.average_latency().map(micros).into(),
            Self::TotalUs => micros(record.total_latency()).into(),
            Self::LastTime => record.last_time().map(|time| time.to_string()).into(),
            Self::LastFaultTime => record.last_fault_time().map(|time| time.to_string()).into(),
            Self::Score => u64::try_from(record.score() / 1_000).unwrap_or(u64::MAX).into(),
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Turns registry snapshots into sink records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Output {
    pub(crate) mode: OutputMode,
    pub(crate) fields: Vec<MetricField>,
    pub(crate) ranked_limit: Option<usize>,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            mode: OutputMode::PerKey,
            fields: MetricField::ALL.to_vec(),
            ranked_limit: None,
        }
    }
}

impl Output {
    /// Renders a key-ordered snapshot.
    ///
    /// Every record starts with `view` (`per_key` or `ranked`) and `key`; ranked records add
    /// `rank`, starting at 1. The selected fields follow in selection order.
    pub(crate) fn render(&self, snapshot: Vec<(String, MetricsRecord)>) -> Vec<Record> {
        let mut records = Vec::new();

        if matches!(self.mode, OutputMode::PerKey | OutputMode::Both) {
            records.extend(snapshot.iter().map(|(key, record)| self.render_one("per_key", key, None, record)));
        }

        if matches!(self.mode, OutputMode::Ranked | OutputMode::Both) {
            let limit = self.ranked_limit.unwrap_or(usize::MAX);
            records.extend(
                rank(snapshot)
                    .iter()
                    .take(limit)
                    .enumerate()
                    .map(|(index, (key, record))| self.render_one("ranked", key, Some(index + 1), record)),
            );
        }

        records
    }

    fn render_one(&self, view: &'static str, key: &str, rank: Option<usize>, record: &MetricsRecord) -> Record {
        let mut rendered = Record::new().with("view", view).with("key", key);
        if let Some(rank) = rank {
            rendered.push("rank", rank);
        }
        for field in &self.fields {
            rendered.push(field.name(), field.value(record));
        }
        rendered
    }
}
