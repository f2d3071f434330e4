// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Asynchronous dispatch: run the rest of a chain on a worker thread.
//!
//! [`Dispatch`] captures the invocation together with the remaining chain into an envelope and
//! appends it to the FIFO queue of a shared [`WorkerPool`]. What the caller sees depends on the
//! [`ReplyMode`]:
//!
//! - [`ReplyMode::FireAndForget`] returns `Value::Null` as soon as the envelope is queued.
//! - [`ReplyMode::Await`] blocks until a worker publishes the outcome. The worker's value or
//!   fault is returned to the caller as if the call had run in place.
//!
//! An awaited call that does not complete in time either raises [`Fault::AsyncTimeout`] or
//! returns `Value::Null`, depending on [`OnTimeout`]. The timeout covers the whole wait, including
//! time spent blocked on a full queue. The worker keeps running a call that was already queued
//! and drops the late response. A call that panics on the worker fails with a fatal
//! [`CALL_PANICKED`][crate::CALL_PANICKED] fault and the worker stays available.
//!
//! Because the invocation moves to another thread, the caller's copy is not updated by stages
//! that run on the worker.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tollgate::dispatch::{Dispatch, WorkerPool};
//! use tollgate::{Chain, Execute, Invocation};
//!
//! let pool = Arc::new(WorkerPool::new("reports", 2)?);
//!
//! let chain = Chain::builder()
//!     .interceptor(
//!         Dispatch::layer(&pool)
//!             .await_response(Some(Duration::from_secs(5)))
//!             .build(),
//!     )
//!     .target(Execute::new(|_: &mut Invocation| Ok(json!("rendered"))));
//!
//! assert_eq!(chain.execute(Invocation::new("report.render")), Ok(json!("rendered")));
//! pool.shutdown();
//! # Ok::<(), std::io::Error>(())
//! ```

mod config;
mod envelope;
mod pool;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use config::DispatchConfig;
use crossbeam_channel::{RecvTimeoutError, bounded};
use envelope::Envelope;
pub use envelope::Response;
use pool::Rejected;
pub use pool::{DEFAULT_QUEUE_CAPACITY, WorkerPool, WorkerPoolBuilder};
use serde_json::Value;

use crate::utils::duration_to_millis;
use crate::{Chain, Fault, Interceptor, Invocation};

/// How the caller of a [`Dispatch`] stage learns the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Return `Value::Null` once the envelope is queued.
    FireAndForget,
    /// Block for the outcome, for at most `timeout` if set.
    Await {
        /// Longest wait for the response; `None` waits indefinitely.
        timeout: Option<Duration>,
    },
}

/// What an awaited call returns when the response doesn't arrive in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OnTimeout {
    /// Raise [`Fault::AsyncTimeout`].
    #[default]
    Fail,
    /// Return `Value::Null`.
    Sentinel,
}

/// Interceptor that hands the rest of the chain to a [`WorkerPool`].
///
/// Created through [`Dispatch::layer`]; see the [module documentation][self] for details.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pool: Arc<WorkerPool>,
    mode: ReplyMode,
    on_timeout: OnTimeout,
}

impl Dispatch {
    /// Starts configuring a dispatch stage that submits to `pool`.
    #[must_use]
    pub fn layer(pool: &Arc<WorkerPool>) -> DispatchLayer {
        DispatchLayer {
            pool: Arc::clone(pool),
            mode: ReplyMode::FireAndForget,
            on_timeout: OnTimeout::Fail,
        }
    }

    /// Starts a worker pool and builds a dispatch stage from plain configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn from_config(config: &DispatchConfig) -> io::Result<Self> {
        let pool = WorkerPool::builder(config.name.clone())
            .workers(config.workers)
            .queue_capacity(config.queue_capacity)
            .build()?;
        Ok(Self::layer(&Arc::new(pool)).config(config).build())
    }

    /// Returns the pool this stage submits to.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Returns the reply mode.
    #[must_use]
    pub fn mode(&self) -> ReplyMode {
        self.mode
    }

    fn timed_out(&self, invocation: &Invocation, timeout: Duration) -> Result<Value, Fault> {
        tracing::event!(
            name: "tollgate.dispatch.timeout",
            tracing::Level::WARN,
            pool.name = self.pool.name(),
            invocation.operation = invocation.operation(),
            dispatch.timeout_ms = duration_to_millis(timeout),
            dispatch.sentinel = self.on_timeout == OnTimeout::Sentinel,
        );

        match self.on_timeout {
            OnTimeout::Fail => Err(Fault::AsyncTimeout { timeout }),
            OnTimeout::Sentinel => Ok(Value::Null),
        }
    }

    fn worker_lost(&self, invocation: &Invocation) -> Fault {
        tracing::event!(
            name: "tollgate.dispatch.worker_lost",
            tracing::Level::ERROR,
            pool.name = self.pool.name(),
            invocation.operation = invocation.operation(),
        );
        Fault::WorkerLost
    }
}

impl Interceptor for Dispatch {
    fn invoke(&self, invocation: &mut Invocation, next: &Chain) -> Result<Value, Fault> {
        let ReplyMode::Await { timeout } = self.mode else {
            self.pool
                .submit(Envelope::new(invocation.clone(), next.clone(), None), None)
                .map_err(|_rejected| Fault::DispatchClosed)?;
            return Ok(Value::Null);
        };

        // One deadline bounds both the enqueue and the wait for the response.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let (sender, receiver) = bounded(1);
        match self
            .pool
            .submit(Envelope::new(invocation.clone(), next.clone(), Some(sender)), deadline)
        {
            Ok(()) => {}
            Err(Rejected::Closed) => return Err(Fault::DispatchClosed),
            Err(Rejected::TimedOut) => return self.timed_out(invocation, timeout.unwrap_or_default()),
        }

        let received = match deadline {
            Some(deadline) => receiver.recv_deadline(deadline),
            None => receiver.recv().map_err(|_disconnected| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(response) => response.into_outcome(),
            Err(RecvTimeoutError::Timeout) => self.timed_out(invocation, timeout.unwrap_or_default()),
            Err(RecvTimeoutError::Disconnected) => Err(self.worker_lost(invocation)),
        }
    }
}

/// Builder for [`Dispatch`], created by [`Dispatch::layer`].
#[derive(Debug, Clone)]
pub struct DispatchLayer {
    pool: Arc<WorkerPool>,
    mode: ReplyMode,
    on_timeout: OnTimeout,
}

impl DispatchLayer {
    /// Returns `Value::Null` to the caller as soon as the call is queued.
    ///
    /// This is the default.
    #[must_use]
    pub fn fire_and_forget(mut self) -> Self {
        self.mode = ReplyMode::FireAndForget;
        self
    }

    /// Blocks the caller until the outcome arrives, for at most `timeout` if set.
    #[must_use]
    pub fn await_response(mut self, timeout: Option<Duration>) -> Self {
        self.mode = ReplyMode::Await { timeout };
        self
    }

    /// Sets what a timed out wait returns.
    ///
    /// **Default**: [`OnTimeout::Fail`].
    #[must_use]
    pub fn on_timeout(mut self, on_timeout: OnTimeout) -> Self {
        self.on_timeout = on_timeout;
        self
    }

    /// Applies the reply mode and timeout behavior from `config`.
    ///
    /// The worker count and queue capacity belong to the pool and are not changed.
    #[must_use]
    pub fn config(mut self, config: &DispatchConfig) -> Self {
        self.mode = config.reply_mode();
        self.on_timeout = config.on_timeout;
        self
    }

    /// Completes the configuration.
    #[must_use]
    pub fn build(self) -> Dispatch {
        Dispatch {
            pool: self.pool,
            mode: self.mode,
            on_timeout: self.on_timeout,
        }
    }
}
