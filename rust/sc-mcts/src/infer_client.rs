//! `sc-infer` integration boundary for `sc-mcts`.
//!
//! Responsible for:
//! - encoding `GameState` -> POV features
//! - submitting to one parameter slot of the inference server
//! - mapping POV logits back to absolute action indices

use sc_core::{encode_state, from_pov_action, GameState, A};
use sc_infer::{InferError, InferenceClient, ModelSlot, StatsSnapshot};

use crate::infer::Inference;

pub struct InferBackend<E> {
    client: InferenceClient<E>,
    slot: ModelSlot,
}

impl<E> Clone for InferBackend<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            slot: self.slot,
        }
    }
}

impl<E> InferBackend<E> {
    pub fn new(client: InferenceClient<E>, slot: ModelSlot) -> Self {
        Self { client, slot }
    }

    pub fn slot(&self) -> ModelSlot {
        self.slot
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.client.stats_snapshot()
    }
}

impl<E> Inference for InferBackend<E> {
    fn eval(&self, state: &GameState) -> Result<([f32; A], f32), InferError> {
        let out = self.client.evaluate(self.slot, encode_state(state))?;
        if out.policy_logits.len() != A {
            return Err(InferError::Evaluation(format!(
                "expected {A} policy logits, got {}",
                out.policy_logits.len()
            )));
        }
        let mut logits = [0.0f32; A];
        for (pov_a, &l) in out.policy_logits.iter().enumerate() {
            logits[from_pov_action(pov_a, state.player_to_move)] = l;
        }
        Ok((logits, out.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_core::{apply_move, initial_state, F};
    use sc_infer::{BoxError, Evaluation, Evaluator, InferenceServer, ServerOptions};

    /// Logit `i` at POV index `i`; value echoes the feature length.
    struct IndexLogits;

    impl Evaluator for IndexLogits {
        fn evaluate_batch(
            &mut self,
            _slot: ModelSlot,
            inputs: &[&[f32]],
        ) -> Result<Vec<Evaluation>, BoxError> {
            Ok(inputs
                .iter()
                .map(|x| Evaluation {
                    policy_logits: (0..A).map(|i| i as f32).collect(),
                    value: x.len() as f32,
                })
                .collect())
        }
    }

    #[test]
    fn logits_are_mapped_back_to_absolute_directions() {
        let server = InferenceServer::spawn(IndexLogits, ServerOptions::default()).unwrap();
        let backend = InferBackend::new(server.client(), ModelSlot::Best);

        let s0 = initial_state(100);
        let (logits, v) = backend.eval(&s0).unwrap();
        assert_eq!(v, F as f32);
        assert_eq!(logits, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        let s1 = apply_move(&s0, 0).unwrap().state;
        assert_eq!(s1.player_to_move, 1);
        let (logits, _) = backend.eval(&s1).unwrap();
        assert_eq!(logits, [4.0, 5.0, 6.0, 7.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(backend.stats_snapshot().requests, 2);
    }
}
