//! Self-play round: a fixed pool of worker threads pulling game ids from a shared counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use sc_core::config::SelfplayConfig;
use sc_core::{Config, Outcome};
use sc_mcts::{Inference, MctsConfig};
use sc_replay::{ReplayError, ReplayStore};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::game_task::{episode_seed, GameRecord, GameTask, GameTaskError};
use crate::temperature::TemperatureSchedule;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("replay store: {0}")]
    Replay(#[from] ReplayError),
    #[error("game {game_id} failed: {source}")]
    Game {
        game_id: u64,
        #[source]
        source: GameTaskError,
    },
    #[error("invalid round config: {0}")]
    InvalidConfig(&'static str),
    #[error("self-play worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub workers: u32,
    pub max_game_retries: u32,
    pub base_seed: u64,
    pub max_moves: u16,
    pub mcts: MctsConfig,
    pub temperature: TemperatureSchedule,
}

impl RoundConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            workers: cfg.selfplay.workers,
            max_game_retries: cfg.selfplay.max_game_retries,
            base_seed: cfg.selfplay.seed,
            max_moves: cfg.game.max_moves,
            mcts: MctsConfig::from(&cfg.mcts),
            temperature: TemperatureSchedule::selfplay(&cfg.selfplay),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundReport {
    pub games_requested: u32,
    pub games_completed: u32,
    /// Games abandoned after exhausting their retries.
    pub games_aborted: u32,
    pub samples: u64,
    pub shards_sealed: u32,
    pub p0_wins: u32,
    pub p1_wins: u32,
    pub draws: u32,
    pub mean_game_len: f64,
    pub wall_ms: u64,
}

impl RoundReport {
    fn record(&mut self, g: &GameRecord) {
        self.games_completed += 1;
        match g.outcome {
            Outcome::Winner(0) => self.p0_wins += 1,
            Outcome::Winner(_) => self.p1_wins += 1,
            Outcome::Draw => self.draws += 1,
        }
        // Running sum until the round closes.
        self.mean_game_len += g.plies as f64;
    }
}

/// Games to play in a round. The first round may be skipped or doubled.
pub fn games_for_round(cfg: &SelfplayConfig, first_round: bool) -> u32 {
    match first_round {
        true if cfg.skip_first_self_play => 0,
        true if cfg.double_first_self_play => cfg.n_self_play_games.saturating_mul(2),
        _ => cfg.n_self_play_games,
    }
}

/// Play `n_games` self-play games with ids `first_game_id..` and append their
/// trajectories to `store`.
///
/// Games that fail on inference are replayed from scratch with the same seed up to
/// `max_game_retries` times, then abandoned. Any replay-store failure stops the round.
pub fn run_selfplay_round<I>(
    cfg: &RoundConfig,
    first_game_id: u64,
    n_games: u32,
    infer: &I,
    store: &ReplayStore,
) -> Result<RoundReport, RuntimeError>
where
    I: Inference + Clone + Send,
{
    if cfg.workers == 0 {
        return Err(RuntimeError::InvalidConfig("selfplay.workers must be > 0"));
    }
    let t0 = Instant::now();
    let end = first_game_id + n_games as u64;
    let next = AtomicU64::new(first_game_id);
    let stop = AtomicBool::new(false);
    let report = Mutex::new(RoundReport {
        games_requested: n_games,
        ..RoundReport::default()
    });
    let first_error: Mutex<Option<RuntimeError>> = Mutex::new(None);
    let workers = cfg.workers.min(n_games.max(1));

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers as usize);
        for w in 0..workers {
            let infer = infer.clone();
            let (next, stop, report, first_error) = (&next, &stop, &report, &first_error);
            let handle = std::thread::Builder::new()
                .name(format!("selfplay-{w}"))
                .spawn_scoped(scope, move || {
                    while !stop.load(Ordering::Relaxed) {
                        let game_id = next.fetch_add(1, Ordering::Relaxed);
                        if game_id >= end {
                            break;
                        }
                        let res = play_one(cfg, game_id, &infer).and_then(|played| {
                            let Some(g) = played else {
                                lock(report).games_aborted += 1;
                                return Ok(());
                            };
                            let sealed = match &g.trajectory {
                                Some(t) => store.append(t.clone())?,
                                None => None,
                            };
                            let mut r = lock(report);
                            r.samples += g.trajectory.as_ref().map_or(0, |t| t.len() as u64);
                            r.record(&g);
                            if sealed.is_some() {
                                r.shards_sealed += 1;
                            }
                            Ok(())
                        });
                        if let Err(e) = res {
                            stop.store(true, Ordering::Relaxed);
                            lock(first_error).get_or_insert(e);
                        }
                    }
                });
            match handle {
                Ok(h) => handles.push(h),
                Err(e) => {
                    stop.store(true, Ordering::Relaxed);
                    lock(first_error).get_or_insert(RuntimeError::Replay(ReplayError::Io(e)));
                }
            }
        }
        for h in handles {
            if h.join().is_err() {
                stop.store(true, Ordering::Relaxed);
                lock(&first_error).get_or_insert(RuntimeError::WorkerPanicked);
            }
        }
    });

    if let Some(e) = into_inner(first_error) {
        return Err(e);
    }
    let mut report = into_inner(report);
    report.mean_game_len = if report.games_completed > 0 {
        report.mean_game_len / report.games_completed as f64
    } else {
        0.0
    };
    report.wall_ms = t0.elapsed().as_millis() as u64;
    info!(
        games = report.games_completed,
        aborted = report.games_aborted,
        samples = report.samples,
        shards = report.shards_sealed,
        wall_ms = report.wall_ms,
        "self-play round done"
    );
    Ok(report)
}

/// `Ok(None)` means the game was abandoned after its retries ran out.
fn play_one<I: Inference>(
    cfg: &RoundConfig,
    game_id: u64,
    infer: &I,
) -> Result<Option<GameRecord>, RuntimeError> {
    let seed = episode_seed(cfg.base_seed, game_id);
    let mut attempt = 0u32;
    loop {
        let task = GameTask::new(
            game_id,
            seed,
            cfg.max_moves,
            cfg.mcts,
            cfg.temperature,
            true,
            true,
        )
        .map_err(|source| RuntimeError::Game { game_id, source })?;
        match task.play_to_end(infer) {
            Ok(g) => {
                debug!(game_id, plies = g.plies, outcome = ?g.outcome, "game finished");
                return Ok(Some(g));
            }
            Err(e) if e.is_inference_failure() && attempt < cfg.max_game_retries => {
                attempt += 1;
                warn!(game_id, attempt, error = %e, "inference failed; replaying game");
            }
            Err(e) if e.is_inference_failure() => {
                warn!(game_id, attempts = attempt + 1, error = %e, "game abandoned");
                return Ok(None);
            }
            Err(source) => return Err(RuntimeError::Game { game_id, source }),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn into_inner<T>(m: Mutex<T>) -> T {
    m.into_inner().unwrap_or_else(|p| p.into_inner())
}
