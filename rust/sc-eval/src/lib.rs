//! sc-eval: gating matches between the "training" challenger and the "best" incumbent.
//!
//! A gate run walks `Idle -> Playing -> Deciding -> Promoted | Rejected -> Idle`.
//! Draws count as half a win.

pub mod machine;
pub mod play;

pub use machine::{decide, Decision, Gate, GateState, GateTally};
pub use play::{play_gate_games, run_gate, GateOptions, GateProgress, GateReport};

use sc_runtime::GameTaskError;
use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid gating config: {0}")]
    InvalidConfig(&'static str),
    #[error("gate cannot {action} while {from:?}")]
    InvalidTransition {
        from: GateState,
        action: &'static str,
    },
    #[error("gate game {index} failed: {source}")]
    Game {
        index: u32,
        #[source]
        source: GameTaskError,
    },
    #[error("promotion failed: {0}")]
    Promotion(#[source] sc_infer::BoxError),
    #[error("gate worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSpec {
    pub episode_seed: u64,
    /// The challenger takes seat 1.
    pub swap: bool,
}

impl GameSpec {
    pub fn cand_seat(&self) -> u8 {
        u8::from(self.swap)
    }
}

/// Deterministic gate schedule.
///
/// Games `2k` and `2k+1` share an episode seed with the seats swapped; an odd
/// final game is unpaired.
pub fn gating_schedule(seed0: u64, games: u32) -> Result<Vec<GameSpec>, GateError> {
    if games == 0 {
        return Err(GateError::InvalidConfig(
            "gating.n_evaluation_games must be > 0",
        ));
    }
    Ok((0..games)
        .map(|i| GameSpec {
            episode_seed: splitmix64(seed0 ^ (i / 2) as u64),
            swap: i % 2 == 1,
        })
        .collect())
}

/// Base seed of the gate run after `iteration`; each cycle gets its own openings.
pub fn cycle_seed(base: u64, iteration: u64) -> u64 {
    splitmix64(base ^ iteration.wrapping_mul(0xA24B_AED4_963E_E407))
}

/// Distinct episode seeds of a schedule, in order.
pub fn schedule_seeds(schedule: &[GameSpec]) -> Vec<u64> {
    let mut out: Vec<u64> = Vec::with_capacity(schedule.len().div_ceil(2));
    for g in schedule {
        if out.last() != Some(&g.episode_seed) {
            out.push(g.episode_seed);
        }
    }
    out
}

pub fn hash_seeds(seeds: &[u64]) -> String {
    let mut h = blake3::Hasher::new();
    for s in seeds {
        h.update(&s.to_le_bytes());
    }
    h.finalize().to_hex().to_string()
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod eval_tests;
