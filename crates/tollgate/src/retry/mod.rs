// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retry: re-invoke the rest of a chain when its outcome matches a condition.
//!
//! After the next position of the chain returns, [`Retry`] evaluates its conditions:
//!
//! - On success, the ordered result conditions are tested against the returned value.
//! - On a fault, the fault and its causes are walked from the outermost inwards. The first
//!   fault whose [`name`][Fault::name] has conditions registered decides. When no name in the
//!   cause chain is registered, the catch-all fault conditions are tested against the outermost
//!   fault.
//!
//! When a condition matches and the retry budget is not exhausted, the stage waits for the
//! retry interval and invokes the same remaining chain again. Otherwise the outcome is returned
//! as it is: an exhausted retry re-raises the original fault, never a wrapper.
//!
//! The attempt counter lives in the invocation under [`RETRY_COUNT_ATTRIBUTE`], so it starts
//! at zero for each external call and is shared by nested retry stages seeing the same
//! invocation. This bounds the total number of retries of one call.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use serde_json::json;
//! use tollgate::retry::{Condition, Retry};
//! use tollgate::{Chain, Execute, Fault, Invocation};
//!
//! let retry = Retry::layer()
//!     .max_retries(3)
//!     .interval(Duration::from_millis(10))
//!     .retry_result(Condition::at("/status").eq(json!("pending")))
//!     .retry_fault("connection_reset", Condition::always())
//!     .build();
//!
//! let chain = Chain::builder()
//!     .interceptor(retry)
//!     .target(Execute::new(|_: &mut Invocation| Ok(json!({ "status": "done" }))));
//!
//! assert_eq!(chain.execute(Invocation::new("job.poll")), Ok(json!({ "status": "done" })));
//! ```

mod condition;
mod config;

use std::borrow::Cow;
use std::thread;
use std::time::Duration;

pub use condition::{Comparison, Condition, PathCondition};
pub use config::{ConditionConfig, FaultConditionConfig, RetryConfig};
use serde_json::Value;

use crate::utils::duration_to_millis;
use crate::{Chain, Fault, Interceptor, Invocation};

/// Invocation attribute holding the number of retries already performed for the call.
pub const RETRY_COUNT_ATTRIBUTE: &str = "tollgate.retry.count";

/// Interceptor that re-invokes the rest of the chain while its outcome matches a condition.
///
/// Created through [`Retry::layer`]; see the [module documentation][self] for details.
#[derive(Debug, Clone)]
pub struct Retry {
    max_retries: u32,
    interval: Option<Duration>,
    on_result: Vec<Condition>,
    on_fault: Vec<(Cow<'static, str>, Condition)>,
    on_any_fault: Vec<Condition>,
}

impl Retry {
    /// Starts configuring a retry stage.
    ///
    /// Without conditions nothing is retried.
    #[must_use]
    pub fn layer() -> RetryLayer {
        RetryLayer {
            max_retries: 0,
            interval: None,
            on_result: Vec::new(),
            on_fault: Vec::new(),
            on_any_fault: Vec::new(),
        }
    }

    /// Builds a retry stage from plain configuration values.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::layer().config(config).build()
    }

    /// Returns how many retries are allowed per call.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns why `outcome` should be retried, or `None` if it should be returned as is.
    fn retry_reason<'a>(&self, outcome: &'a Result<Value, Fault>) -> Option<&'a str> {
        match outcome {
            Ok(value) => self
                .on_result
                .iter()
                .any(|condition| condition.matches(value))
                .then_some("result"),
            Err(fault) => self.fault_matches(fault).then(|| fault.name()),
        }
    }

    fn fault_matches(&self, fault: &Fault) -> bool {
        for cause in fault.causes() {
            let mut registered = self
                .on_fault
                .iter()
                .filter(|(name, _)| name == cause.name())
                .peekable();

            if registered.peek().is_some() {
                let properties = cause.properties();
                return registered.any(|(_, condition)| condition.matches(&properties));
            }
        }

        if self.on_any_fault.is_empty() {
            return false;
        }

        let properties = fault.properties();
        self.on_any_fault.iter().any(|condition| condition.matches(&properties))
    }
}

impl Interceptor for Retry {
    fn invoke(&self, invocation: &mut Invocation, next: &Chain) -> Result<Value, Fault> {
        loop {
            let outcome = next.proceed(invocation);

            let Some(reason) = self.retry_reason(&outcome) else {
                return outcome;
            };

            let attempt = invocation.counter(RETRY_COUNT_ATTRIBUTE);
            if attempt >= u64::from(self.max_retries) {
                return outcome;
            }

            tracing::event!(
                name: "tollgate.retry",
                tracing::Level::WARN,
                invocation.operation = invocation.operation(),
                retry.attempt = attempt + 1,
                retry.max_retries = self.max_retries,
                retry.reason = reason,
                retry.delay_ms = self.interval.map_or(0, duration_to_millis),
            );

            if let Some(interval) = self.interval {
                thread::sleep(interval);
            }

            invocation.set_counter(RETRY_COUNT_ATTRIBUTE, attempt + 1);
        }
    }
}

/// Builder for [`Retry`], created by [`Retry::layer`].
#[derive(Debug, Clone)]
pub struct RetryLayer {
    max_retries: u32,
    interval: Option<Duration>,
    on_result: Vec<Condition>,
    on_fault: Vec<(Cow<'static, str>, Condition)>,
    on_any_fault: Vec<Condition>,
}

impl RetryLayer {
    /// Sets how many times one call may be retried. Zero disables retries.
    ///
    /// **Default**: 0
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the pause before each retry. A zero duration retries immediately.
    ///
    /// **Default**: no pause.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Retries a successful call whose value matches `condition`.
    ///
    /// Result conditions are tested in the order they were added.
    #[must_use]
    pub fn retry_result(mut self, condition: Condition) -> Self {
        self.on_result.push(condition);
        self
    }

    /// Retries a call that failed with a fault named `name`, or caused by one, when
    /// `condition` matches that fault's properties.
    ///
    /// Several conditions may be registered for the same name; any of them matching retries.
    #[must_use]
    pub fn retry_fault(mut self, name: impl Into<Cow<'static, str>>, condition: Condition) -> Self {
        self.on_fault.push((name.into(), condition));
        self
    }

    /// Retries a failed call whose fault has no registered name in its cause chain when
    /// `condition` matches the fault's properties.
    #[must_use]
    pub fn retry_any_fault(mut self, condition: Condition) -> Self {
        self.on_any_fault.push(condition);
        self
    }

    /// Replaces the budget, interval and conditions with those from `config`.
    #[must_use]
    pub fn config(mut self, config: &RetryConfig) -> Self {
        self.max_retries = config.max_retries;
        self.interval = config.interval();
        self.on_result = config.on_result.iter().map(Condition::from).collect();
        self.on_fault.clear();
        self.on_any_fault.clear();

        for entry in &config.on_fault {
            let condition = entry.condition();
            match entry.fault.as_deref() {
                Some(name) if !name.is_empty() => self.on_fault.push((name.to_owned().into(), condition)),
                _ => self.on_any_fault.push(condition),
            }
        }
        self
    }

    /// Completes the configuration.
    #[must_use]
    pub fn build(self) -> Retry {
        Retry {
            max_retries: self.max_retries,
            interval: self.interval,
            on_result: self.on_result,
            on_fault: self.on_fault,
            on_any_fault: self.on_any_fault,
        }
    }
}
