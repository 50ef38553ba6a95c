//! `InferenceClient`: cloneable handle onto the evaluation thread's work queue.
//!
//! - every request gets its own single-use reply channel, so results cannot be misrouted
//! - callers block only on their own `Ticket`
//! - `exclusive` runs a closure on the evaluation thread with `&mut` access to the evaluator

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::server::{panic_message, InferJob, Job, ServerStats};
use crate::{Evaluation, InferError, ModelSlot};

#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub batches: u64,
    pub errors: u64,
    pub max_batch: u64,
    pub exclusive_jobs: u64,
    /// Mean time between enqueue and the start of the forward pass.
    pub mean_queue_wait_us: f64,
}

impl StatsSnapshot {
    pub fn mean_batch(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.requests as f64 / self.batches as f64
        }
    }
}

/// Pending reply for one submitted request.
#[derive(Debug)]
pub struct Ticket {
    pub request_id: u64,
    rx: mpsc::Receiver<Result<Evaluation, InferError>>,
}

impl Ticket {
    pub fn recv(&self) -> Result<Evaluation, InferError> {
        match self.rx.recv() {
            Ok(r) => r,
            Err(_) => Err(InferError::Disconnected),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Evaluation, InferError> {
        match self.rx.recv_timeout(timeout) {
            Ok(r) => r,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(InferError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(InferError::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Result<Option<Evaluation>, InferError> {
        match self.rx.try_recv() {
            Ok(r) => Ok(Some(r?)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(InferError::Disconnected),
        }
    }
}

pub struct InferenceClient<E> {
    tx: mpsc::Sender<Job<E>>,
    stats: Arc<ServerStats>,
    next_request_id: Arc<AtomicU64>,
}

impl<E> Clone for InferenceClient<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
            next_request_id: Arc::clone(&self.next_request_id),
        }
    }
}

impl<E> std::fmt::Debug for InferenceClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceClient")
            .field("stats", &self.stats_snapshot())
            .finish()
    }
}

impl<E> InferenceClient<E> {
    pub(crate) fn new(tx: mpsc::Sender<Job<E>>, stats: Arc<ServerStats>) -> Self {
        Self {
            tx,
            stats,
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn send_job(&self, job: Job<E>) -> Result<(), InferError> {
        self.tx.send(job).map_err(|_| InferError::Disconnected)
    }

    /// Enqueue one encoded state for evaluation.
    pub fn submit(&self, slot: ModelSlot, features: Vec<f32>) -> Result<Ticket, InferError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = mpsc::channel();
        self.send_job(Job::Infer(InferJob {
            slot,
            features,
            reply,
            enqueued: Instant::now(),
        }))?;
        Ok(Ticket { request_id, rx })
    }

    /// Submit and block for the reply.
    pub fn evaluate(&self, slot: ModelSlot, features: Vec<f32>) -> Result<Evaluation, InferError> {
        self.submit(slot, features)?.recv()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let s = &self.stats;
        let requests = s.requests.load(Ordering::Relaxed);
        let wait = s.queue_wait_us_total.load(Ordering::Relaxed);
        StatsSnapshot {
            requests,
            batches: s.batches.load(Ordering::Relaxed),
            errors: s.errors.load(Ordering::Relaxed),
            max_batch: s.max_batch.load(Ordering::Relaxed),
            exclusive_jobs: s.exclusive_jobs.load(Ordering::Relaxed),
            mean_queue_wait_us: if requests == 0 {
                0.0
            } else {
                wait as f64 / requests as f64
            },
        }
    }
}

impl<E: 'static> InferenceClient<E> {
    /// Run `f` on the evaluation thread and wait for its result.
    ///
    /// No inference request is served while `f` runs, so every mutation it makes
    /// is observed by later requests in full or not at all.
    pub fn exclusive<R, F>(&self, f: F) -> Result<R, InferError>
    where
        R: Send + 'static,
        F: FnOnce(&mut E) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Result<R, InferError>>();
        self.send_job(Job::Exclusive(Box::new(move |e: &mut E| {
            let r = catch_unwind(AssertUnwindSafe(|| f(e)))
                .map_err(|p| InferError::Panicked(panic_message(p.as_ref())));
            let _ = tx.send(r);
        })))?;
        match rx.recv() {
            Ok(r) => r,
            Err(_) => Err(InferError::Disconnected),
        }
    }
}
