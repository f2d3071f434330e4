// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::utils::duration_to_millis;

/// Name reported by [`Fault::name`] for [`Fault::AdmissionDenied`].
pub const ADMISSION_DENIED: &str = "admission_denied";

/// Name reported by [`Fault::name`] for [`Fault::AsyncTimeout`].
pub const ASYNC_TIMEOUT: &str = "async_timeout";

/// Name reported by [`Fault::name`] for [`Fault::DispatchClosed`].
pub const DISPATCH_CLOSED: &str = "dispatch_closed";

/// Name reported by [`Fault::name`] for [`Fault::WorkerLost`].
pub const WORKER_LOST: &str = "worker_lost";

/// Name of the fatal fault a dispatch worker reports when the call it runs panics.
pub const CALL_PANICKED: &str = "call_panicked";

/// Failure produced by an invocation travelling through a [`Chain`][crate::Chain].
///
/// The first four variants are raised by the pipeline itself. Everything raised by a
/// [`Target`][crate::Target] or a custom interceptor is carried by [`Fault::Raised`] and is
/// propagated unchanged unless a retry condition consumes it.
///
/// `Fault` acts as the fault classifier used across the crate:
///
/// - [`name`][Fault::name] is the identity retry tables are keyed by.
/// - [`class`][Fault::class] buckets the fault for metrics.
/// - [`cause`][Fault::cause] and [`causes`][Fault::causes] unwrap nested causes.
/// - [`properties`][Fault::properties] exposes a JSON view that conditions address by path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Fault {
    /// A semaphore could not be acquired within the configured constraints.
    #[error("admission to '{semaphore}' denied: {reason}")]
    AdmissionDenied {
        /// Name of the semaphore that denied the call.
        semaphore: Cow<'static, str>,
        /// Why the acquisition failed.
        reason: DeniedReason,
    },

    /// A correlated response did not arrive in time. The work may still complete later.
    #[error("no asynchronous response within {timeout:?}")]
    AsyncTimeout {
        /// The response timeout that elapsed.
        timeout: Duration,
    },

    /// The worker pool was shut down before the call could be queued.
    #[error("the dispatch queue is closed")]
    DispatchClosed,

    /// The worker executing the call terminated without producing a response.
    #[error("the worker terminated before responding")]
    WorkerLost,

    /// A fault raised by a target or an interceptor.
    #[error(transparent)]
    Raised(Raised),
}

/// Reason attached to [`Fault::AdmissionDenied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DeniedReason {
    /// No permit became available before the acquire timeout elapsed.
    Timeout,
    /// The waiter queue was already full.
    TooManyWaiters,
}

impl Display for DeniedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("acquire timed out"),
            Self::TooManyWaiters => f.write_str("too many waiters"),
        }
    }
}

/// Outcome bucket used for metrics.
///
/// The class never changes control flow; faults of both classes propagate unless retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FaultClass {
    /// Expected failure the caller can reasonably handle.
    Fault,
    /// Unexpected failure, for example a broken invariant in the callee.
    Fatal,
}

/// An application fault with a name, a class, a message, structured detail and an optional cause.
#[derive(Debug, Clone, PartialEq)]
pub struct Raised {
    name: Cow<'static, str>,
    class: FaultClass,
    message: Cow<'static, str>,
    detail: Value,
    cause: Option<Box<Fault>>,
}

impl Raised {
    /// Returns the fault name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fault class.
    #[must_use]
    pub fn class(&self) -> FaultClass {
        self.class
    }

    /// Returns the human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the structured detail attached to the fault.
    #[must_use]
    pub fn detail(&self) -> &Value {
        &self.detail
    }

    /// Attaches structured detail that retry conditions can inspect.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    /// Wraps `cause` as the underlying cause of this fault.
    #[must_use]
    pub fn caused_by(mut self, cause: impl Into<Fault>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl Display for Raised {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Raised {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<Raised> for Fault {
    fn from(raised: Raised) -> Self {
        Self::Raised(raised)
    }
}

impl Fault {
    /// Creates an expected fault.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::{Fault, FaultClass};
    ///
    /// let fault = Fault::raise("io.timeout", "backend did not answer");
    /// assert_eq!(fault.name(), "io.timeout");
    /// assert_eq!(fault.class(), FaultClass::Fault);
    /// ```
    #[must_use]
    pub fn raise(name: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Raised {
        Self::raised(name, FaultClass::Fault, message)
    }

    /// Creates an unexpected, fatal fault.
    #[must_use]
    pub fn fatal(name: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Raised {
        Self::raised(name, FaultClass::Fatal, message)
    }

    fn raised(name: impl Into<Cow<'static, str>>, class: FaultClass, message: impl Into<Cow<'static, str>>) -> Raised {
        Raised {
            name: name.into(),
            class,
            message: message.into(),
            detail: Value::Null,
            cause: None,
        }
    }

    /// Returns the identity of the fault used to key retry conditions.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::AdmissionDenied { .. } => ADMISSION_DENIED,
            Self::AsyncTimeout { .. } => ASYNC_TIMEOUT,
            Self::DispatchClosed => DISPATCH_CLOSED,
            Self::WorkerLost => WORKER_LOST,
            Self::Raised(raised) => raised.name(),
        }
    }

    /// Returns the metrics bucket of the fault.
    #[must_use]
    pub fn class(&self) -> FaultClass {
        match self {
            Self::AdmissionDenied { .. } | Self::AsyncTimeout { .. } | Self::DispatchClosed => FaultClass::Fault,
            Self::WorkerLost => FaultClass::Fatal,
            Self::Raised(raised) => raised.class(),
        }
    }

    /// Returns the immediate cause of this fault, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        match self {
            Self::Raised(raised) => raised.cause.as_deref(),
            _ => None,
        }
    }

    /// Iterates over this fault followed by each of its causes, nearest first.
    pub fn causes(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |&fault| fault.cause())
    }

    /// Returns `true` if the fault is [`Fault::AdmissionDenied`].
    #[must_use]
    pub fn is_admission_denied(&self) -> bool {
        matches!(self, Self::AdmissionDenied { .. })
    }

    /// Returns `true` if the fault is [`Fault::AsyncTimeout`].
    #[must_use]
    pub fn is_async_timeout(&self) -> bool {
        matches!(self, Self::AsyncTimeout { .. })
    }

    /// JSON view of this fault (without its causes) used by path-based conditions.
    ///
    /// The object always contains `name`, `class` and `message`. Raised faults add `detail`,
    /// admission faults add `semaphore` and `reason`, timeouts add `timeout_ms`.
    #[must_use]
    pub fn properties(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_owned(), Value::from(self.name()));
        let class = match self.class() {
            FaultClass::Fault => "fault",
            FaultClass::Fatal => "fatal",
        };
        map.insert("class".to_owned(), Value::from(class));

        match self {
            Self::AdmissionDenied { semaphore, reason } => {
                map.insert("message".to_owned(), Value::from(self.to_string()));
                map.insert("semaphore".to_owned(), Value::from(semaphore.as_ref()));
                let reason = match reason {
                    DeniedReason::Timeout => "timeout",
                    DeniedReason::TooManyWaiters => "too_many_waiters",
                };
                map.insert("reason".to_owned(), Value::from(reason));
            }
            Self::AsyncTimeout { timeout } => {
                map.insert("message".to_owned(), Value::from(self.to_string()));
                map.insert("timeout_ms".to_owned(), Value::from(duration_to_millis(*timeout)));
            }
            Self::DispatchClosed | Self::WorkerLost => {
                map.insert("message".to_owned(), Value::from(self.to_string()));
            }
            Self::Raised(raised) => {
                map.insert("message".to_owned(), Value::from(raised.message()));
                map.insert("detail".to_owned(), raised.detail().clone());
            }
        }

        Value::Object(map)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(Fault: Send, Sync, Clone, std::error::Error);
    }

    #[test]
    fn causes_walk_nearest_first() {
        let root = Fault::raise("io.reset", "connection reset");
        let middle = Fault::raise("backend.unavailable", "backend down").caused_by(root);
        let top = Fault::from(Fault::fatal("handler.failed", "handler gave up").caused_by(middle));

        let names: Vec<_> = top.causes().map(Fault::name).collect();

        assert_eq!(names, ["handler.failed", "backend.unavailable", "io.reset"]);
        assert_eq!(top.class(), FaultClass::Fatal);
        assert_eq!(top.cause().map(Fault::class), Some(FaultClass::Fault));
    }

    #[test]
    fn builtin_names_and_classes() {
        let denied = Fault::AdmissionDenied {
            semaphore: "db".into(),
            reason: DeniedReason::TooManyWaiters,
        };
        assert_eq!(denied.name(), ADMISSION_DENIED);
        assert!(denied.is_admission_denied());
        assert_eq!(denied.class(), FaultClass::Fault);

        let timeout = Fault::AsyncTimeout {
            timeout: Duration::from_millis(100),
        };
        assert_eq!(timeout.name(), ASYNC_TIMEOUT);
        assert!(timeout.is_async_timeout());

        assert_eq!(Fault::WorkerLost.class(), FaultClass::Fatal);
        assert_eq!(Fault::DispatchClosed.name(), DISPATCH_CLOSED);
    }

    #[test]
    fn properties_expose_detail() {
        let fault = Fault::from(Fault::raise("http.status", "bad gateway").with_detail(json!({ "status": 502 })));

        let props = fault.properties();

        assert_eq!(props.pointer("/name"), Some(&json!("http.status")));
        assert_eq!(props.pointer("/class"), Some(&json!("fault")));
        assert_eq!(props.pointer("/detail/status"), Some(&json!(502)));
    }

    #[test]
    fn properties_for_timeout() {
        let fault = Fault::AsyncTimeout {
            timeout: Duration::from_millis(250),
        };

        assert_eq!(fault.properties().pointer("/timeout_ms"), Some(&json!(250)));
    }

    #[test]
    fn display_includes_cause() {
        let fault = Fault::from(Fault::raise("outer", "wrapped").caused_by(Fault::WorkerLost));

        assert_eq!(fault.to_string(), "outer: wrapped (caused by the worker terminated before responding)");
        assert!(std::error::Error::source(&fault).is_some());
    }
}
