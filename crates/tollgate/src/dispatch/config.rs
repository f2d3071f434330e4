// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use super::{DEFAULT_QUEUE_CAPACITY, OnTimeout, ReplyMode};
use crate::utils::positive_millis;

/// Plain configuration values for a dispatch stage and the pool behind it.
///
/// A non-positive `response_timeout_ms` means "wait indefinitely".
///
/// # Examples
///
/// ```
/// use tollgate::dispatch::{Dispatch, DispatchConfig};
///
/// let config = DispatchConfig {
///     name: "mailer".into(),
///     workers: 4,
///     await_response: true,
///     response_timeout_ms: 2_000,
///     ..DispatchConfig::default()
/// };
///
/// let dispatch = Dispatch::from_config(&config)?;
/// assert_eq!(dispatch.pool().live_workers(), 4);
/// # dispatch.pool().shutdown();
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DispatchConfig {
    /// Pool name, used for worker thread names and logs.
    pub name: String,
    /// Number of worker threads.
    pub workers: usize,
    /// Number of envelopes the work queue holds.
    pub queue_capacity: usize,
    /// Whether the caller blocks for the outcome.
    pub await_response: bool,
    /// Longest wait for a response in milliseconds.
    pub response_timeout_ms: i64,
    /// What a timed out wait returns.
    pub on_timeout: OnTimeout,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name: "tollgate-dispatch".to_owned(),
            workers: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            await_response: false,
            response_timeout_ms: 0,
            on_timeout: OnTimeout::Fail,
        }
    }
}

impl DispatchConfig {
    pub(crate) fn response_timeout(&self) -> Option<Duration> {
        positive_millis(self.response_timeout_ms)
    }

    pub(crate) fn reply_mode(&self) -> ReplyMode {
        if self.await_response {
            ReplyMode::Await {
                timeout: self.response_timeout(),
            }
        } else {
            ReplyMode::FireAndForget
        }
    }
}
