use std::cell::Cell;

use sc_core::{GameState, A};
use sc_infer::{
    BoxError, Evaluation, Evaluator, InferError, InferenceServer, ModelSlot, ServerOptions,
};
use sc_mcts::{InferBackend, Inference, MctsConfig, UniformInference};
use sc_runtime::TemperatureSchedule;

use crate::{run_gate, Decision, GateError, GateOptions};

fn opts(games: u32, max_moves: u16, threshold: f64) -> GateOptions {
    GateOptions {
        games,
        workers: 3,
        max_game_retries: 1,
        max_moves,
        seed: 9,
        threshold,
        mcts: MctsConfig {
            simulations: 8,
            dirichlet_epsilon: 0.0,
            ..MctsConfig::default()
        },
        temperature: TemperatureSchedule::constant(1.0),
    }
}

#[derive(Clone, Copy)]
struct Broken;

impl Inference for Broken {
    fn eval(&self, _state: &GameState) -> Result<([f32; A], f32), InferError> {
        Err(InferError::Evaluation("down".to_string()))
    }
}

// A one-kick cap turns every game into a draw, so the win rate is exactly 0.5.

#[test]
fn all_draws_promote_at_half_and_report_progress() {
    let promoted = Cell::new(0);
    let mut seen = Vec::new();
    let mut sink = |done: u32, total: u32| seen.push((done, total));
    let report = run_gate(
        &opts(6, 1, 0.5),
        &UniformInference,
        &UniformInference,
        || {
            promoted.set(promoted.get() + 1);
            Ok(())
        },
        Some(&mut sink),
    )
    .unwrap();
    assert_eq!(report.draws, 6);
    assert_eq!(report.win_rate, 0.5);
    assert_eq!(report.draw_rate, 1.0);
    assert_eq!(report.decision, Decision::Promote);
    assert_eq!(promoted.get(), 1);
    assert_eq!(report.seeds.len(), 3);
    assert_eq!(seen.len(), 6);
    assert_eq!(seen.last(), Some(&(6, 6)));
}

#[test]
fn below_threshold_rejects_without_promoting() {
    let report = run_gate(
        &opts(4, 1, 0.55),
        &UniformInference,
        &UniformInference,
        || -> Result<(), BoxError> { panic!("must not promote") },
        None,
    )
    .unwrap();
    assert_eq!(report.decision, Decision::Reject);
    assert!(!report.promoted());
}

#[test]
fn every_game_is_accounted_for() {
    let report = run_gate(
        &opts(5, 40, 0.5),
        &UniformInference,
        &UniformInference,
        || Ok(()),
        None,
    )
    .unwrap();
    assert_eq!(report.games, 5);
    assert_eq!(report.cand_wins + report.cand_losses + report.draws, 5);
    assert!(report.mean_game_len >= 1.0);
}

#[test]
fn successive_gate_cycles_use_fresh_seeds() {
    let gate = |o: GateOptions| {
        run_gate(&o, &UniformInference, &UniformInference, || Ok(()), None).unwrap()
    };
    let first = gate(opts(4, 1, 0.5).for_iteration(1));
    let again = gate(opts(4, 1, 0.5).for_iteration(1));
    let next = gate(opts(4, 1, 0.5).for_iteration(2));
    assert_eq!(first.seeds_hash, again.seeds_hash);
    assert_ne!(first.seeds_hash, next.seeds_hash);
    assert!(next.seeds.iter().all(|s| !first.seeds.contains(s)));
}

#[test]
fn failing_promotion_is_surfaced() {
    let err = run_gate(
        &opts(2, 1, 0.5),
        &UniformInference,
        &UniformInference,
        || Err("io".into()),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, GateError::Promotion(_)));
}

#[test]
fn persistent_inference_failure_fails_the_gate() {
    let err = run_gate(&opts(4, 10, 0.5), &Broken, &UniformInference, || Ok(()), None)
        .unwrap_err();
    assert!(matches!(err, GateError::Game { .. }), "{err}");
}

/// Counts promotions; "best" and "training" answer with different values.
struct Slots {
    promotions: u32,
}

impl Evaluator for Slots {
    fn evaluate_batch(
        &mut self,
        slot: ModelSlot,
        inputs: &[&[f32]],
    ) -> Result<Vec<Evaluation>, BoxError> {
        let value = match slot {
            ModelSlot::Best => -0.1,
            ModelSlot::Training => 0.1,
        };
        Ok(inputs
            .iter()
            .map(|_| Evaluation {
                policy_logits: vec![0.0; A],
                value,
            })
            .collect())
    }
}

#[test]
fn promotion_runs_as_an_exclusive_job_on_the_inference_thread() {
    let server = InferenceServer::spawn(Slots { promotions: 0 }, ServerOptions::default()).unwrap();
    let client = server.client();
    let cand = InferBackend::new(client.clone(), ModelSlot::Training);
    let best = InferBackend::new(client.clone(), ModelSlot::Best);
    let report = run_gate(
        &opts(4, 1, 0.5),
        &cand,
        &best,
        || {
            client
                .exclusive(|s: &mut Slots| s.promotions += 1)
                .map_err(|e| Box::new(e) as BoxError)
        },
        None,
    )
    .unwrap();
    assert!(report.promoted());
    assert_eq!(client.exclusive(|s: &mut Slots| s.promotions).unwrap(), 1);
    let stats = cand.stats_snapshot();
    assert!(stats.requests > 0);
    assert_eq!(stats.exclusive_jobs, 2);
}
