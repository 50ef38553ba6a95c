//! Evaluation thread: work queue, contiguous batching and failure isolation.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thiserror::Error;

use crate::client::InferenceClient;
use crate::{Evaluation, Evaluator, InferError, ModelSlot};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to spawn evaluation thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("evaluation thread panicked")]
    Panicked,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Largest number of contiguous same-slot requests run as one forward pass.
    pub max_batch: usize,
    /// Evaluation thread name.
    pub thread_name: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_batch: 32,
            thread_name: "sc-infer".to_string(),
        }
    }
}

pub(crate) type Reply = mpsc::Sender<Result<Evaluation, InferError>>;

pub(crate) struct InferJob {
    pub slot: ModelSlot,
    pub features: Vec<f32>,
    pub reply: Reply,
    pub enqueued: Instant,
}

pub(crate) enum Job<E> {
    Infer(InferJob),
    Exclusive(Box<dyn FnOnce(&mut E) + Send>),
    Shutdown,
}

#[derive(Debug, Default)]
pub(crate) struct ServerStats {
    pub requests: AtomicU64,
    pub batches: AtomicU64,
    pub errors: AtomicU64,
    pub max_batch: AtomicU64,
    pub exclusive_jobs: AtomicU64,
    pub queue_wait_us_total: AtomicU64,
}

/// Owner of the evaluation thread.
///
/// Dropping the server shuts the thread down; `shutdown` also hands back the evaluator.
pub struct InferenceServer<E: Evaluator> {
    client: InferenceClient<E>,
    join: Option<JoinHandle<E>>,
}

impl<E: Evaluator> InferenceServer<E> {
    pub fn spawn(evaluator: E, opts: ServerOptions) -> Result<Self, ServerError> {
        let (tx, rx) = mpsc::channel::<Job<E>>();
        let stats = Arc::new(ServerStats::default());
        let stats_loop = Arc::clone(&stats);
        let max_batch = opts.max_batch.max(1);
        let join = thread::Builder::new()
            .name(opts.thread_name.clone())
            .spawn(move || serve(evaluator, rx, max_batch, &stats_loop))?;
        tracing::debug!(max_batch, "inference server started");
        Ok(Self {
            client: InferenceClient::new(tx, stats),
            join: Some(join),
        })
    }

    /// A new handle onto the work queue.
    pub fn client(&self) -> InferenceClient<E> {
        self.client.clone()
    }

    /// Stop the evaluation thread after the jobs already queued and return the evaluator.
    ///
    /// Requests submitted afterwards through surviving clients fail with `Disconnected`.
    pub fn shutdown(mut self) -> Result<E, ServerError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<E, ServerError> {
        let join = self.join.take().ok_or(ServerError::Panicked)?;
        let _ = self.client.send_job(Job::Shutdown);
        join.join().map_err(|_| ServerError::Panicked)
    }
}

impl<E: Evaluator> Drop for InferenceServer<E> {
    fn drop(&mut self) {
        if self.join.is_some() {
            let _ = self.stop();
        }
    }
}

fn serve<E: Evaluator>(
    mut evaluator: E,
    rx: mpsc::Receiver<Job<E>>,
    max_batch: usize,
    stats: &ServerStats,
) -> E {
    let mut carry: Option<Job<E>> = None;
    loop {
        let job = match carry.take() {
            Some(j) => j,
            None => match rx.recv() {
                Ok(j) => j,
                // Every client is gone.
                Err(_) => break,
            },
        };
        match job {
            Job::Shutdown => break,
            Job::Exclusive(f) => {
                stats.exclusive_jobs.fetch_add(1, Ordering::Relaxed);
                f(&mut evaluator);
            }
            Job::Infer(first) => {
                let slot = first.slot;
                let mut batch = vec![first];
                // Only contiguous requests join, so queue order is preserved.
                while batch.len() < max_batch {
                    match rx.try_recv() {
                        Ok(Job::Infer(j)) if j.slot == slot => batch.push(j),
                        Ok(other) => {
                            carry = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                run_batch(&mut evaluator, slot, batch, stats);
            }
        }
    }
    tracing::debug!("inference server stopped");
    evaluator
}

fn run_batch<E: Evaluator>(
    evaluator: &mut E,
    slot: ModelSlot,
    batch: Vec<InferJob>,
    stats: &ServerStats,
) {
    let n = batch.len();
    stats.requests.fetch_add(n as u64, Ordering::Relaxed);
    stats.batches.fetch_add(1, Ordering::Relaxed);
    stats.max_batch.fetch_max(n as u64, Ordering::Relaxed);
    let waited: u64 = batch
        .iter()
        .map(|j| j.enqueued.elapsed().as_micros() as u64)
        .sum();
    stats.queue_wait_us_total.fetch_add(waited, Ordering::Relaxed);

    let res = {
        let inputs: Vec<&[f32]> = batch.iter().map(|j| j.features.as_slice()).collect();
        guarded_forward(evaluator, slot, &inputs)
    };
    match res {
        Ok(outs) => {
            for (job, out) in batch.into_iter().zip(outs) {
                // A caller that gave up on its ticket is not an error.
                let _ = job.reply.send(Ok(out));
            }
        }
        Err(e) if n == 1 => {
            stats.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(slot = slot.as_str(), error = %e, "inference request failed");
            if let Some(job) = batch.into_iter().next() {
                let _ = job.reply.send(Err(e));
            }
        }
        Err(e) => {
            // Re-run one by one so only the offending request sees the error.
            tracing::warn!(slot = slot.as_str(), batch = n, error = %e, "batch failed, isolating");
            for job in batch {
                let r = guarded_forward(evaluator, slot, &[job.features.as_slice()]).and_then(
                    |mut outs| {
                        outs.pop().ok_or(InferError::BatchMismatch {
                            expected: 1,
                            got: 0,
                        })
                    },
                );
                if r.is_err() {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                }
                let _ = job.reply.send(r);
            }
        }
    }
}

fn guarded_forward<E: Evaluator>(
    evaluator: &mut E,
    slot: ModelSlot,
    inputs: &[&[f32]],
) -> Result<Vec<Evaluation>, InferError> {
    let n = inputs.len();
    match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate_batch(slot, inputs))) {
        Ok(Ok(outs)) if outs.len() == n => Ok(outs),
        Ok(Ok(outs)) => Err(InferError::BatchMismatch {
            expected: n,
            got: outs.len(),
        }),
        Ok(Err(e)) => Err(InferError::Evaluation(e.to_string())),
        Err(payload) => Err(InferError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
