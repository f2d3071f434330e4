// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use super::envelope::Envelope;

/// Default number of envelopes the work queue holds before submitters block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A fixed set of worker threads draining one FIFO work queue.
///
/// Envelopes are taken from the queue in submission order. With a single worker they also
/// complete in submission order; with several workers they run concurrently. Neither a fault
/// nor a panic raised while processing one envelope stops the worker: a panic is turned into a
/// fatal [`CALL_PANICKED`][crate::CALL_PANICKED] fault for that envelope.
///
/// A pool is meant to be shared: several [`Dispatch`][super::Dispatch] stages, possibly in
/// different chains, can submit to the same pool.
///
/// Dropping the last handle closes the queue; workers finish what is already queued and then
/// exit on their own. Call [`shutdown`][Self::shutdown] to also wait for them.
#[derive(Debug)]
pub struct WorkerPool {
    name: Cow<'static, str>,
    queue_capacity: usize,
    sender: Mutex<Option<Sender<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<Stats>,
}

#[derive(Debug, Default)]
struct Stats {
    live: AtomicUsize,
    completed: AtomicU64,
}

impl WorkerPool {
    /// Starts configuring a worker pool.
    #[must_use]
    pub fn builder(name: impl Into<Cow<'static, str>>) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            name: name.into(),
            workers: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Starts a pool of `workers` threads with the default queue capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(name: impl Into<Cow<'static, str>>, workers: usize) -> io::Result<Self> {
        Self::builder(name).workers(workers).build()
    }

    /// Returns the pool name, used for worker thread names and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Returns the number of worker threads still running.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.stats.live.load(Ordering::Acquire)
    }

    /// Returns the number of envelopes waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Returns the number of envelopes processed so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.stats.completed.load(Ordering::Acquire)
    }

    /// Returns `true` once the queue no longer accepts envelopes.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Appends an envelope to the queue, blocking while the queue is full but never past
    /// `deadline`.
    pub(crate) fn submit(&self, envelope: Envelope, deadline: Option<Instant>) -> Result<(), Rejected> {
        // Clone the sender so a full queue doesn't block other submitters on the lock.
        let sender = self.sender.lock().clone().ok_or(Rejected::Closed)?;

        match deadline {
            None => sender.send(envelope).map_err(|_closed| Rejected::Closed),
            Some(deadline) => sender.send_deadline(envelope, deadline).map_err(|error| match error {
                SendTimeoutError::Timeout(_) => Rejected::TimedOut,
                SendTimeoutError::Disconnected(_) => Rejected::Closed,
            }),
        }
    }

    /// Closes the queue and waits for the workers to drain it.
    ///
    /// Envelopes submitted afterwards fail with
    /// [`Fault::DispatchClosed`][crate::Fault::DispatchClosed]. Calling this from a worker thread
    /// closes the queue without waiting for that worker.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                // A worker that panicked has already been reported.
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.get_mut().take());
    }
}

/// Why [`WorkerPool::submit`] did not queue an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    Closed,
    TimedOut,
}

/// Builder for [`WorkerPool`], created by [`WorkerPool::builder`].
#[derive(Debug, Clone)]
pub struct WorkerPoolBuilder {
    name: Cow<'static, str>,
    workers: usize,
    queue_capacity: usize,
}

impl WorkerPoolBuilder {
    /// Sets the number of worker threads. Zero is treated as one.
    ///
    /// **Default**: 1
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets how many envelopes the queue holds before submitters block. Zero is treated as one.
    ///
    /// **Default**: [`DEFAULT_QUEUE_CAPACITY`]
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Spawns the workers.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned. Workers that were already
    /// started exit once the partially built pool is dropped.
    pub fn build(self) -> io::Result<WorkerPool> {
        let (sender, receiver) = bounded(self.queue_capacity);
        let stats = Arc::new(Stats::default());
        let mut workers = Vec::with_capacity(self.workers);

        for index in 0..self.workers {
            let worker = Worker {
                pool: self.name.clone(),
                receiver: receiver.clone(),
                stats: Arc::clone(&stats),
            };
            stats.live.fetch_add(1, Ordering::AcqRel);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", self.name))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    stats.live.fetch_sub(1, Ordering::AcqRel);
                    return Err(error);
                }
            }
        }

        Ok(WorkerPool {
            name: self.name,
            queue_capacity: self.queue_capacity,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            stats,
        })
    }
}

struct Worker {
    pool: Cow<'static, str>,
    receiver: Receiver<Envelope>,
    stats: Arc<Stats>,
}

impl Worker {
    fn run(self) {
        let _guard = WorkerGuard {
            pool: &self.pool,
            stats: &self.stats,
        };

        while let Ok(envelope) = self.receiver.recv() {
            envelope.process(&self.pool);
            self.stats.completed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

struct WorkerGuard<'a> {
    pool: &'a str,
    stats: &'a Stats,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::AcqRel);

        if thread::panicking() {
            tracing::event!(
                name: "tollgate.dispatch.worker_lost",
                tracing::Level::ERROR,
                pool.name = self.pool,
                pool.live_workers = self.stats.live.load(Ordering::Acquire),
            );
        }
    }
}
