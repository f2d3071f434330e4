// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use super::{OnDenied, Semaphore};
use crate::utils::positive_millis;

/// Plain configuration values for an admission stage and the semaphore behind it.
///
/// Millisecond fields follow the convention that zero or a negative value means "not set":
/// no acquire timeout (wait indefinitely), and no forced release. A non-positive
/// `max_waiters` leaves the waiter queue unbounded.
///
/// # Examples
///
/// ```
/// use tollgate::admission::{Admission, AdmissionConfig};
///
/// let config = AdmissionConfig {
///     name: "payments".into(),
///     capacity: 8,
///     acquire_timeout_ms: 250,
///     ..AdmissionConfig::default()
/// };
///
/// let admission = Admission::from_config(&config);
/// assert_eq!(admission.semaphore().capacity(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AdmissionConfig {
    /// Semaphore name used in faults and logs.
    pub name: String,
    /// Number of permits.
    pub capacity: usize,
    /// Longest wait for a permit in milliseconds.
    pub acquire_timeout_ms: i64,
    /// Maximum number of queued callers.
    pub max_waiters: i64,
    /// Milliseconds after which a held permit is reclaimed.
    pub force_release_ms: i64,
    /// What to do when admission fails.
    pub on_denied: OnDenied,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            capacity: 1,
            acquire_timeout_ms: 0,
            max_waiters: 0,
            force_release_ms: 0,
            on_denied: OnDenied::Fail,
        }
    }
}

impl AdmissionConfig {
    /// Builds the semaphore described by this configuration.
    #[must_use]
    pub fn semaphore(&self) -> Semaphore {
        Semaphore::new(self.name.clone(), self.capacity).max_waiters(self.waiter_limit())
    }

    pub(crate) fn acquire_timeout(&self) -> Option<Duration> {
        positive_millis(self.acquire_timeout_ms)
    }

    pub(crate) fn force_release(&self) -> Option<Duration> {
        positive_millis(self.force_release_ms)
    }

    fn waiter_limit(&self) -> Option<usize> {
        usize::try_from(self.max_waiters).ok().filter(|max| *max > 0)
    }
}
