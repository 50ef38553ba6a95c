//! sc-infer: in-process inference server.
//!
//! The network's execution context is owned by one evaluation thread. Any
//! number of callers enqueue requests on a shared work queue and block on a
//! private, single-use reply channel. Parameter mutation (training steps,
//! promotion, checkpoint IO) runs on the same thread as exclusive jobs.

pub mod client;
pub mod server;

pub use client::{InferenceClient, StatsSnapshot, Ticket};
pub use server::{InferenceServer, ServerError, ServerOptions};

use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Boxed error type returned by evaluators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which parameter set answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSlot {
    /// Incumbent parameters; self-play and the gate's defender.
    Best,
    /// Parameters updated by the trainer; the gate's challenger.
    Training,
}

impl ModelSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelSlot::Best => "best",
            ModelSlot::Training => "training",
        }
    }
}

/// Network output for one encoded state.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Unnormalised logits over the action space, in the encoded player's frame.
    pub policy_logits: Vec<f32>,
    /// Value in [-1, 1] from the encoded player's POV.
    pub value: f32,
}

/// Something that owns network parameters and runs forward passes.
///
/// Implementations live on the evaluation thread and are never shared.
pub trait Evaluator: Send + 'static {
    /// One forward pass. Must return exactly one `Evaluation` per input.
    fn evaluate_batch(
        &mut self,
        slot: ModelSlot,
        inputs: &[&[f32]],
    ) -> Result<Vec<Evaluation>, BoxError>;
}

/// Per-request failure as seen by a caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferError {
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("evaluator panicked: {0}")]
    Panicked(String),
    #[error("evaluator returned {got} outputs for {expected} inputs")]
    BatchMismatch { expected: usize, got: usize },
    #[error("inference server disconnected")]
    Disconnected,
    #[error("request timed out")]
    Timeout,
}
