//! Parallel gate games and the full gate cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use sc_core::{Config, Outcome};
use sc_infer::BoxError;
use sc_mcts::{Inference, MctsConfig};
use sc_runtime::{GameTask, GameTaskError, TemperatureSchedule};
use tracing::{info, warn};

use crate::machine::{Decision, Gate};
use crate::{cycle_seed, gating_schedule, hash_seeds, schedule_seeds, GameSpec, GateError};

#[derive(Debug, Clone)]
pub struct GateOptions {
    pub games: u32,
    pub workers: u32,
    pub max_game_retries: u32,
    pub max_moves: u16,
    pub seed: u64,
    pub threshold: f64,
    pub mcts: MctsConfig,
    pub temperature: TemperatureSchedule,
}

impl GateOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let mut mcts = MctsConfig::from(&cfg.mcts);
        mcts.dirichlet_epsilon = 0.0;
        Self {
            games: cfg.gating.n_evaluation_games,
            workers: cfg.selfplay.workers,
            max_game_retries: cfg.selfplay.max_game_retries,
            max_moves: cfg.game.max_moves,
            seed: cfg.gating.seed,
            threshold: cfg.gating.new_best_model_threshold,
            mcts,
            temperature: TemperatureSchedule::evaluation(&cfg.gating, &cfg.selfplay),
        }
    }

    /// Reseed for the gate run after `iteration` completed iterations.
    pub fn for_iteration(mut self, iteration: u64) -> Self {
        self.seed = cycle_seed(self.seed, iteration);
        self
    }
}

/// Progress sink, called on the gate's driving thread.
pub trait GateProgress {
    fn on_game_completed(&mut self, completed: u32, total: u32);
}

impl<F: FnMut(u32, u32)> GateProgress for F {
    fn on_game_completed(&mut self, completed: u32, total: u32) {
        self(completed, total)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateReport {
    pub games: u32,
    pub cand_wins: u32,
    pub cand_losses: u32,
    pub draws: u32,
    pub win_rate: f64,
    pub draw_rate: f64,
    pub mean_game_len: f64,
    pub threshold: f64,
    pub decision: Decision,
    pub seeds: Vec<u64>,
    pub seeds_hash: String,
    pub wall_ms: u64,
}

impl GateReport {
    pub fn promoted(&self) -> bool {
        self.decision == Decision::Promote
    }
}

struct Finished {
    index: u32,
    outcome: Outcome,
    cand_seat: u8,
    plies: u32,
}

fn play_gate_game<C: Inference, B: Inference>(
    opts: &GateOptions,
    index: u32,
    spec: GameSpec,
    cand: &C,
    best: &B,
) -> Result<Finished, GameTaskError> {
    let cand_seat = spec.cand_seat();
    let mut task = GameTask::new(
        index as u64,
        spec.episode_seed,
        opts.max_moves,
        opts.mcts,
        opts.temperature,
        false,
        false,
    )?;
    while !task.is_terminal() {
        if task.state.player_to_move == cand_seat {
            task.step(cand)?;
        } else {
            task.step(best)?;
        }
    }
    let rec = task.finish()?;
    Ok(Finished {
        index,
        outcome: rec.outcome,
        cand_seat,
        plies: rec.plies,
    })
}

fn play_with_retries<C: Inference, B: Inference>(
    opts: &GateOptions,
    index: u32,
    spec: GameSpec,
    cand: &C,
    best: &B,
) -> Result<Finished, GateError> {
    let mut attempt = 0u32;
    loop {
        match play_gate_game(opts, index, spec, cand, best) {
            Ok(f) => return Ok(f),
            Err(e) if e.is_inference_failure() && attempt < opts.max_game_retries => {
                attempt += 1;
                warn!(index, attempt, error = %e, "gate game inference failed; replaying");
            }
            Err(source) => return Err(GateError::Game { index, source }),
        }
    }
}

/// Play `schedule` on `opts.workers` threads and record every result into `gate`,
/// which must be `Playing`. The first failure stops the remaining games.
pub fn play_gate_games<C, B>(
    opts: &GateOptions,
    schedule: &[GameSpec],
    cand: &C,
    best: &B,
    gate: &mut Gate,
    mut progress: Option<&mut dyn GateProgress>,
) -> Result<(), GateError>
where
    C: Inference + Clone + Send,
    B: Inference + Clone + Send,
{
    if opts.workers == 0 {
        return Err(GateError::InvalidConfig("selfplay.workers must be > 0"));
    }
    let total = schedule.len() as u32;
    let next = AtomicU32::new(0);
    let stop = AtomicBool::new(false);
    let workers = opts.workers.min(total.max(1));

    std::thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<Result<Finished, GateError>>();
        for w in 0..workers {
            let (cand, best, wtx) = (cand.clone(), best.clone(), tx.clone());
            let (next, stop) = (&next, &stop);
            let spawned = std::thread::Builder::new()
                .name(format!("gate-{w}"))
                .spawn_scoped(scope, move || {
                    while !stop.load(Ordering::Relaxed) {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(spec) = schedule.get(i as usize) else {
                            break;
                        };
                        let r = play_with_retries(opts, i, *spec, &cand, &best);
                        let failed = r.is_err();
                        if wtx.send(r).is_err() || failed {
                            break;
                        }
                    }
                });
            if spawned.is_err() {
                stop.store(true, Ordering::Relaxed);
                let _ = tx.send(Err(GateError::WorkerPanicked));
            }
        }
        drop(tx);

        let mut first_error = None;
        let mut completed = 0u32;
        for msg in rx {
            match msg {
                Ok(f) if first_error.is_none() => {
                    if let Err(e) = gate.record(f.outcome, f.cand_seat, f.plies) {
                        stop.store(true, Ordering::Relaxed);
                        first_error = Some(e);
                        continue;
                    }
                    completed += 1;
                    if let Some(p) = progress.as_deref_mut() {
                        p.on_game_completed(completed, total);
                    }
                    tracing::debug!(index = f.index, completed, total, "gate game done");
                }
                Ok(_) => {}
                Err(e) => {
                    stop.store(true, Ordering::Relaxed);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None if completed < total => Err(GateError::WorkerPanicked),
            None => Ok(()),
        }
    })
}

/// One full gate cycle: play, decide, and on promotion run `promote`.
///
/// `promote` must copy "training" onto "best" atomically with respect to
/// inference readers. The gate is back in `Idle` when this returns `Ok`.
pub fn run_gate<C, B, P>(
    opts: &GateOptions,
    cand: &C,
    best: &B,
    promote: P,
    progress: Option<&mut dyn GateProgress>,
) -> Result<GateReport, GateError>
where
    C: Inference + Clone + Send,
    B: Inference + Clone + Send,
    P: FnOnce() -> Result<(), BoxError>,
{
    let t0 = Instant::now();
    let schedule = gating_schedule(opts.seed, opts.games)?;
    let seeds = schedule_seeds(&schedule);
    let mut gate = Gate::new(opts.threshold)?;
    gate.begin(opts.games)?;

    if let Err(e) = play_gate_games(opts, &schedule, cand, best, &mut gate, progress) {
        gate.abort();
        return Err(e);
    }
    let decision = gate.decide()?;
    if decision == Decision::Promote {
        promote().map_err(GateError::Promotion)?;
    }
    let tally = gate.reset()?;
    let report = GateReport {
        games: tally.games,
        cand_wins: tally.cand_wins,
        cand_losses: tally.cand_losses,
        draws: tally.draws,
        win_rate: tally.win_rate(),
        draw_rate: tally.draw_rate(),
        mean_game_len: tally.mean_game_len(),
        threshold: opts.threshold,
        decision,
        seeds_hash: hash_seeds(&seeds),
        seeds,
        wall_ms: t0.elapsed().as_millis() as u64,
    };
    info!(
        games = report.games,
        wins = report.cand_wins,
        losses = report.cand_losses,
        draws = report.draws,
        win_rate = report.win_rate,
        decision = decision.as_str(),
        "gate decided"
    );
    Ok(report)
}
