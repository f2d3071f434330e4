// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use parking_lot::Mutex;

use super::{MetricsRecord, OutcomeClass};

/// Per-key metrics records shared by metrics stages and reporters.
///
/// Each key has its own lock, so calls recorded under different keys never contend. A registry
/// is owned by whoever creates it; several chains may record into the same one.
///
/// A key that records nothing between two [`drain`][Self::drain] calls is removed by the second
/// one, so the number of keys tracks the keys in recent use.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    records: DashMap<String, Mutex<MetricsRecord>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call under `key`, creating the record on first use.
    pub fn record(&self, key: &str, elapsed: Duration, outcome: OutcomeClass) {
        let now = Timestamp::now();

        // The map guard stays held while the record is locked, so a record can't be removed
        // between lookup and update.
        if let Some(existing) = self.records.get(key) {
            existing.lock().record(elapsed, outcome, now);
            return;
        }

        self.records
            .entry(key.to_owned())
            .or_default()
            .value_mut()
            .get_mut()
            .record(elapsed, outcome, now);
    }

    /// Returns a copy of the record for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<MetricsRecord> {
        let record = self.records.get(key)?.lock().clone();
        (!record.is_empty()).then_some(record)
    }

    /// Returns the number of keys with at least one recorded call.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if no calls were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every non-empty record, sorted by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, MetricsRecord)> {
        self.collect(|record| record.clone())
    }

    /// Copies every non-empty record and clears it, sorted by key.
    ///
    /// Each record is copied and cleared under its lock, so a concurrent call is counted either
    /// in the returned snapshot or in the next one. Keys left empty by the previous drain are
    /// removed first.
    #[must_use]
    pub fn drain(&self) -> Vec<(String, MetricsRecord)> {
        self.records.retain(|_, record| !record.get_mut().is_empty());
        self.collect(std::mem::take)
    }

    /// Removes every key and its record.
    pub fn reset(&self) {
        self.records.clear();
    }

    /// Every non-empty record sorted by [`score`][MetricsRecord::score], highest first.
    ///
    /// Records with equal scores are ordered by key.
    #[must_use]
    pub fn ranked(&self) -> Vec<(String, MetricsRecord)> {
        rank(self.snapshot())
    }

    fn collect(&self, mut read: impl FnMut(&mut MetricsRecord) -> MetricsRecord) -> Vec<(String, MetricsRecord)> {
        let mut snapshot: Vec<_> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), read(&mut *entry.value().lock())))
            .filter(|(_, record)| !record.is_empty())
            .collect();
        snapshot.sort_by(|(left, _), (right, _)| left.cmp(right));
        snapshot
    }
}

/// Sorts a key-ordered snapshot by descending score, keeping key order among equal scores.
pub(crate) fn rank(mut snapshot: Vec<(String, MetricsRecord)>) -> Vec<(String, MetricsRecord)> {
    snapshot.sort_by(|(_, left), (_, right)| right.score().cmp(&left.score()));
    snapshot
}
