//! Inference interface consumed by the search.

use sc_core::{GameState, A};
use sc_infer::InferError;

/// Leaf evaluator.
///
/// - `policy_logits[a]` are unnormalized logits over absolute action indices.
/// - `value` is in [-1,1] from the POV of `state.player_to_move`.
pub trait Inference {
    fn eval(&self, state: &GameState) -> Result<([f32; A], f32), InferError>;
}

/// Uniform policy + zero value (baseline stub).
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformInference;

impl Inference for UniformInference {
    fn eval(&self, _state: &GameState) -> Result<([f32; A], f32), InferError> {
        Ok(([0.0f32; A], 0.0))
    }
}

impl<T: Inference + ?Sized> Inference for &T {
    fn eval(&self, state: &GameState) -> Result<([f32; A], f32), InferError> {
        (**self).eval(state)
    }
}
