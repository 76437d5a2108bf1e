// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded worker pool for blocking enclave calls.
//!
//! A fixed set of OS threads pulls units of work from a bounded queue. The
//! event loop submits a closure and awaits its result on a oneshot channel,
//! so the loop never runs secure-module or disk work itself.
//!
//! - A full queue makes submitters wait; nothing is dropped.
//! - A panicking unit is caught and reported as [`PoolError::Panicked`];
//!   the worker thread keeps serving.
//! - [`WorkerPool::shutdown`] refuses new units, lets queued ones finish and
//!   joins the threads. Only the first call does anything. The join runs on
//!   a detached thread, so a unit stuck past the deadline never holds up the
//!   runtime's own shutdown.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("unit of work panicked")]
    Panicked,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    worker_count: usize,
}

impl WorkerPool {
    /// Start `worker_count` threads sharing a queue of `queue_depth` units.
    pub fn new(worker_count: usize, queue_depth: usize) -> Result<Self, PoolError> {
        let (sender, receiver) = mpsc::channel::<Job>(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("eservice-worker-{i}"))
                .spawn(move || worker_loop(i, receiver))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            handles.push(handle);
        }

        info!(workers = worker_count, queue_depth, "Worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            pending: Arc::new(AtomicUsize::new(0)),
            worker_count,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Units queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run `f` on a worker thread and wait for its result.
    ///
    /// Waits for queue space when the queue is full.
    pub async fn submit<F, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Closed)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            pending.fetch_sub(1, Ordering::AcqRel);
            // The submitter may have gone away (client disconnected).
            let _ = reply_tx.send(outcome);
        });

        self.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(job).await.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(PoolError::Closed);
        }
        drop(sender);

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(PoolError::Panicked),
            Err(_) => Err(PoolError::Closed),
        }
    }

    /// Refuse new units, drain the queue and join the workers.
    ///
    /// Returns `false` if the workers were still busy when `deadline`
    /// passed. Later calls return `true` immediately.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            debug!("Worker pool already shut down");
            return true;
        }
        drop(sender);

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        info!(pending = self.pending(), "Draining worker pool");

        let (joined_tx, joined_rx) = oneshot::channel();
        let joiner = std::thread::Builder::new()
            .name("eservice-worker-join".to_string())
            .spawn(move || {
                for handle in handles {
                    if handle.join().is_err() {
                        error!("Worker thread exited abnormally");
                    }
                }
                let _ = joined_tx.send(());
            });
        if let Err(e) = joiner {
            warn!(error = %e, "Unable to join worker threads; leaving them detached");
            return false;
        }

        match tokio::time::timeout(deadline, joined_rx).await {
            Ok(_) => {
                info!("Worker pool stopped");
                true
            }
            Err(_) => {
                warn!(pending = self.pending(), ?deadline, "Worker pool did not drain before deadline");
                false
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    debug!(worker = id, "Worker started");
    loop {
        let job = {
            let mut rx = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            rx.blocking_recv()
        };
        match job {
            Some(job) => job(),
            None => break,
        }
    }
    debug!(worker = id, "Worker exiting (queue closed)");
}
