// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Admission control: bound how many calls run the rest of a chain at the same time.
//!
//! [`Admission`] acquires one permit from a shared [`Semaphore`] before invoking the next
//! position of the chain and releases it when that call returns, whether it produced a value
//! or a fault. Three independent limits apply:
//!
//! | Limit | Meaning | Unset |
//! |-------|---------|-------|
//! | acquire timeout | longest wait for a permit | wait indefinitely |
//! | max waiters | callers allowed to queue; the excess is refused immediately | unbounded |
//! | force release | a held permit is reclaimed after this long, even if never released | never |
//!
//! When admission fails the stage either raises [`Fault::AdmissionDenied`] or returns
//! [`Value::Null`] without calling the rest of the chain, depending on [`OnDenied`].
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tollgate::admission::{Admission, Semaphore};
//! use tollgate::{Chain, Execute, Invocation};
//!
//! let semaphore = Arc::new(Semaphore::new("inventory_db", 4).max_waiters(Some(16)));
//!
//! let chain = Chain::builder()
//!     .interceptor(
//!         Admission::layer(&semaphore)
//!             .acquire_timeout(Duration::from_millis(500))
//!             .force_release(Duration::from_secs(30))
//!             .build(),
//!     )
//!     .target(Execute::new(|_: &mut Invocation| Ok(json!("stock: 12"))));
//!
//! assert_eq!(chain.execute(Invocation::new("inventory.get")), Ok(json!("stock: 12")));
//! ```
//!
//! [`Value::Null`]: serde_json::Value::Null

mod config;
mod semaphore;

use std::sync::Arc;
use std::time::Duration;

pub use config::AdmissionConfig;
pub use semaphore::{Permit, Semaphore};
use serde_json::Value;

use crate::{Chain, Fault, Interceptor, Invocation};

/// What the admission stage does when no permit can be acquired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OnDenied {
    /// Raise [`Fault::AdmissionDenied`].
    #[default]
    Fail,
    /// Return `Value::Null` without invoking the rest of the chain.
    Skip,
}

/// Interceptor that gates the rest of the chain behind a [`Semaphore`].
///
/// Created through [`Admission::layer`]; see the [module documentation][self] for details.
#[derive(Debug, Clone)]
pub struct Admission {
    semaphore: Arc<Semaphore>,
    acquire_timeout: Option<Duration>,
    force_release: Option<Duration>,
    on_denied: OnDenied,
}

impl Admission {
    /// Starts configuring an admission stage guarded by `semaphore`.
    #[must_use]
    pub fn layer(semaphore: &Arc<Semaphore>) -> AdmissionLayer {
        AdmissionLayer {
            semaphore: Arc::clone(semaphore),
            acquire_timeout: None,
            force_release: None,
            on_denied: OnDenied::Fail,
        }
    }

    /// Builds a semaphore and an admission stage from plain configuration values.
    #[must_use]
    pub fn from_config(config: &AdmissionConfig) -> Self {
        let semaphore = Arc::new(config.semaphore());
        Self::layer(&semaphore).config(config).build()
    }

    /// Returns the semaphore guarding this stage.
    #[must_use]
    pub fn semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }

    fn denied(&self, invocation: &Invocation, reason: crate::DeniedReason) -> Result<Value, Fault> {
        tracing::event!(
            name: "tollgate.admission.denied",
            tracing::Level::WARN,
            semaphore.name = self.semaphore.name(),
            invocation.operation = invocation.operation(),
            admission.reason = %reason,
            admission.skip = self.on_denied == OnDenied::Skip,
        );

        match self.on_denied {
            OnDenied::Fail => Err(Fault::AdmissionDenied {
                semaphore: self.semaphore.name().to_owned().into(),
                reason,
            }),
            OnDenied::Skip => Ok(Value::Null),
        }
    }
}

impl Interceptor for Admission {
    fn invoke(&self, invocation: &mut Invocation, next: &Chain) -> Result<Value, Fault> {
        let permit = match self.semaphore.acquire(self.acquire_timeout, self.force_release) {
            Ok(permit) => permit,
            Err(reason) => return self.denied(invocation, reason),
        };

        let outcome = next.proceed(invocation);
        drop(permit);
        outcome
    }
}

/// Builder for [`Admission`], created by [`Admission::layer`].
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    semaphore: Arc<Semaphore>,
    acquire_timeout: Option<Duration>,
    force_release: Option<Duration>,
    on_denied: OnDenied,
}

impl AdmissionLayer {
    /// Sets the longest time a caller waits for a permit.
    ///
    /// **Default**: wait indefinitely.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Waits indefinitely for a permit.
    #[must_use]
    pub fn wait_indefinitely(mut self) -> Self {
        self.acquire_timeout = None;
        self
    }

    /// Reclaims a permit this long after it was acquired, even if the holder is still running.
    ///
    /// **Default**: permits are never reclaimed.
    #[must_use]
    pub fn force_release(mut self, after: Duration) -> Self {
        self.force_release = Some(after);
        self
    }

    /// Sets the behavior when admission fails.
    ///
    /// **Default**: [`OnDenied::Fail`].
    #[must_use]
    pub fn on_denied(mut self, on_denied: OnDenied) -> Self {
        self.on_denied = on_denied;
        self
    }

    /// Applies the timeouts and denial behavior from `config`.
    ///
    /// The capacity and waiter bound belong to the semaphore and are not changed.
    #[must_use]
    pub fn config(mut self, config: &AdmissionConfig) -> Self {
        self.acquire_timeout = config.acquire_timeout();
        self.force_release = config.force_release();
        self.on_denied = config.on_denied;
        self
    }

    /// Completes the configuration.
    #[must_use]
    pub fn build(self) -> Admission {
        Admission {
            semaphore: self.semaphore,
            acquire_timeout: self.acquire_timeout,
            force_release: self.force_release,
            on_denied: self.on_denied,
        }
    }
}
