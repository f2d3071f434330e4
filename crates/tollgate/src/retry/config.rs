// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde_json::Value;

use super::{Comparison, Condition};
use crate::utils::positive_millis;

/// A declarative path condition: the value at `path` compared with `value` using `op`.
///
/// The default configuration tests whether the whole value is present and not null.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConditionConfig {
    /// JSON pointer into the result or the fault properties.
    pub path: String,
    /// Comparison to apply.
    pub op: Comparison,
    /// Operand compared with the addressed value.
    pub value: Value,
}

impl From<&ConditionConfig> for Condition {
    fn from(config: &ConditionConfig) -> Self {
        Self::compare(config.path.clone(), config.op, config.value.clone())
    }
}

/// A fault condition entry.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FaultConditionConfig {
    /// Fault name the entry is registered under. `None` or empty makes it a catch-all entry.
    pub fault: Option<String>,
    /// Condition on the fault properties. `None` matches every fault.
    pub when: Option<ConditionConfig>,
}

impl FaultConditionConfig {
    pub(crate) fn condition(&self) -> Condition {
        self.when.as_ref().map_or_else(Condition::always, Condition::from)
    }
}

/// Plain configuration values for a retry stage.
///
/// A non-positive `interval_ms` retries without pausing.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tollgate::retry::{Comparison, ConditionConfig, Retry, RetryConfig};
///
/// let config = RetryConfig {
///     max_retries: 2,
///     on_result: vec![ConditionConfig {
///         path: String::new(),
///         op: Comparison::Lt,
///         value: json!(0),
///     }],
///     ..RetryConfig::default()
/// };
///
/// let retry = Retry::from_config(&config);
/// assert_eq!(retry.max_retries(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    /// Retries allowed per call.
    pub max_retries: u32,
    /// Pause before each retry in milliseconds.
    pub interval_ms: i64,
    /// Result conditions, tested in order.
    pub on_result: Vec<ConditionConfig>,
    /// Fault conditions.
    pub on_fault: Vec<FaultConditionConfig>,
}

impl RetryConfig {
    pub(crate) fn interval(&self) -> Option<Duration> {
        positive_millis(self.interval_ms)
    }
}
