// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::DeniedReason;

/// A counting semaphore with a bounded waiter queue and optional forced release of permits.
///
/// At most [`capacity`][Semaphore::capacity] permits are held at any time. Callers that cannot
/// get a permit immediately join the waiter queue unless it already holds
/// [`max_waiters`][Semaphore::max_waiters] callers, in which case they are refused at once.
///
/// A permit acquired with a forced-release deadline is a lease: once the deadline passes the
/// semaphore reclaims it even if the holder never releases it. Expired leases are swept every
/// time the semaphore state is inspected, and waiters bound their sleep by the nearest lease
/// deadline so a stalled holder cannot keep them blocked past it. When the original holder
/// eventually drops a reclaimed [`Permit`], the release is a no-op.
///
/// A semaphore is usually shared, by wrapping it in an [`Arc`], between every admission stage
/// that guards the same resource.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tollgate::admission::Semaphore;
///
/// let semaphore = Arc::new(Semaphore::new("db", 1));
///
/// let permit = semaphore.acquire(None, None).unwrap();
/// assert_eq!(semaphore.available(), 0);
/// assert!(semaphore.acquire(Some(Duration::from_millis(10)), None).is_err());
///
/// drop(permit);
/// assert_eq!(semaphore.available(), 1);
/// ```
pub struct Semaphore {
    name: Cow<'static, str>,
    capacity: usize,
    max_waiters: Option<usize>,
    state: Mutex<State>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct State {
    leases: HashMap<u64, Option<Instant>>,
    next_lease: u64,
    waiters: usize,
    reclaimed: u64,
}

impl State {
    fn grant(&mut self, force_release: Option<Duration>, now: Instant) -> u64 {
        let lease = self.next_lease;
        self.next_lease += 1;
        self.leases.insert(lease, force_release.and_then(|after| now.checked_add(after)));
        lease
    }

    /// Removes every lease whose forced-release deadline has passed, returning how many went.
    fn sweep(&mut self, now: Instant, name: &str) -> usize {
        let before = self.leases.len();
        self.leases.retain(|lease, deadline| {
            let expired = deadline.is_some_and(|deadline| deadline <= now);
            if expired {
                tracing::event!(
                    name: "tollgate.admission.reclaimed",
                    tracing::Level::WARN,
                    semaphore.name = name,
                    semaphore.lease = *lease,
                    "permit forcibly released after its holder exceeded the release timeout",
                );
            }
            !expired
        });
        let swept = before - self.leases.len();
        self.reclaimed += swept as u64;
        swept
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.leases.values().flatten().min().copied()
    }
}

impl Semaphore {
    /// Creates a semaphore with `capacity` permits and an unbounded waiter queue.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            max_waiters: None,
            state: Mutex::new(State::default()),
            released: Condvar::new(),
        }
    }

    /// Bounds the waiter queue; `None` leaves it unbounded.
    #[must_use]
    pub fn max_waiters(mut self, max_waiters: Option<usize>) -> Self {
        self.max_waiters = max_waiters;
        self
    }

    /// Returns the name used in faults and log events.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the total number of permits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the waiter queue bound, if any.
    #[must_use]
    pub fn waiter_limit(&self) -> Option<usize> {
        self.max_waiters
    }

    /// Returns the number of permits currently held.
    #[must_use]
    pub fn acquired(&self) -> usize {
        let mut state = self.state.lock();
        self.sweep(&mut state, Instant::now());
        state.leases.len()
    }

    /// Returns the number of permits that can be acquired without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity - self.acquired()
    }

    /// Returns the number of callers currently waiting for a permit.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters
    }

    /// Returns how many permits have been forcibly reclaimed since creation.
    #[must_use]
    pub fn reclaimed(&self) -> u64 {
        let mut state = self.state.lock();
        self.sweep(&mut state, Instant::now());
        state.reclaimed
    }

    /// Acquires a permit, waiting at most `timeout` (`None` waits indefinitely).
    ///
    /// When `force_release` is set the returned permit is reclaimed automatically once that
    /// much time has passed since acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`DeniedReason::TooManyWaiters`] without waiting when the waiter queue is full,
    /// or [`DeniedReason::Timeout`] when no permit became available in time.
    pub fn acquire(self: &Arc<Self>, timeout: Option<Duration>, force_release: Option<Duration>) -> Result<Permit, DeniedReason> {
        let start = Instant::now();
        let deadline = timeout.and_then(|timeout| start.checked_add(timeout));
        let mut state = self.state.lock();
        self.sweep(&mut state, start);

        if state.leases.len() < self.capacity {
            let lease = state.grant(force_release, start);
            return Ok(self.permit(lease));
        }

        if self.max_waiters.is_some_and(|max| state.waiters >= max) {
            return Err(DeniedReason::TooManyWaiters);
        }

        state.waiters += 1;
        let outcome = loop {
            let wake_at = match (deadline, state.next_expiry()) {
                (Some(deadline), Some(expiry)) => Some(deadline.min(expiry)),
                (deadline, expiry) => deadline.or(expiry),
            };

            match wake_at {
                Some(wake_at) => {
                    let _timed_out = self.released.wait_until(&mut state, wake_at);
                }
                None => self.released.wait(&mut state),
            }

            let now = Instant::now();
            self.sweep(&mut state, now);

            if state.leases.len() < self.capacity {
                break Ok(state.grant(force_release, now));
            }

            if deadline.is_some_and(|deadline| now >= deadline) {
                break Err(DeniedReason::Timeout);
            }
        };
        state.waiters -= 1;

        outcome.map(|lease| self.permit(lease))
    }

    /// Acquires a permit only if one is available right now.
    ///
    /// # Errors
    ///
    /// Returns [`DeniedReason::Timeout`] when every permit is held.
    pub fn try_acquire(self: &Arc<Self>, force_release: Option<Duration>) -> Result<Permit, DeniedReason> {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.sweep(&mut state, now);

        if state.leases.len() < self.capacity {
            let lease = state.grant(force_release, now);
            Ok(self.permit(lease))
        } else {
            Err(DeniedReason::Timeout)
        }
    }

    fn permit(self: &Arc<Self>, lease: u64) -> Permit {
        Permit {
            semaphore: Arc::clone(self),
            lease,
        }
    }

    fn sweep(&self, state: &mut State, now: Instant) {
        if state.sweep(now, &self.name) > 0 {
            self.released.notify_all();
        }
    }

    fn release(&self, lease: u64) {
        let released = self.state.lock().leases.remove(&lease).is_some();
        if released {
            self.released.notify_one();
        }
    }

    fn holds(&self, lease: u64) -> bool {
        let mut state = self.state.lock();
        self.sweep(&mut state, Instant::now());
        state.leases.contains_key(&lease)
    }
}

impl Debug for Semaphore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("max_waiters", &self.max_waiters)
            .field("acquired", &state.leases.len())
            .field("waiters", &state.waiters)
            .finish()
    }
}

/// A permit held on a [`Semaphore`]; dropping it releases the permit.
///
/// If the permit was forcibly reclaimed, dropping it does nothing.
#[must_use = "the permit is released as soon as it is dropped"]
pub struct Permit {
    semaphore: Arc<Semaphore>,
    lease: u64,
}

impl Permit {
    /// Returns `true` if the semaphore has already reclaimed this permit.
    #[must_use]
    pub fn is_reclaimed(&self) -> bool {
        !self.semaphore.holds(self.lease)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release(self.lease);
    }
}

impl Debug for Permit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("semaphore", &self.semaphore.name)
            .field("lease", &self.lease)
            .finish()
    }
}
