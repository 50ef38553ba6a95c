use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sc_core::{apply_move, initial_state, legal_moves, ApplyError, GameState, Outcome, A};
use sc_mcts::{apply_temperature, sample_action, Inference, Mcts, MctsConfig, MctsError, SearchMode};
use sc_replay::{Trajectory, TrajectoryBuilder};
use thiserror::Error;

use crate::temperature::TemperatureSchedule;

#[derive(Debug, Error)]
pub enum GameTaskError {
    #[error("search failed: {0}")]
    Search(#[from] MctsError),
    #[error("rules engine rejected the chosen kick: {0}")]
    Rules(#[from] ApplyError),
    #[error("game {0} is not finished")]
    NotFinished(u64),
}

impl GameTaskError {
    /// Inference failures are transient; the game may be replayed.
    pub fn is_inference_failure(&self) -> bool {
        matches!(self, GameTaskError::Search(MctsError::Inference(_)))
    }
}

/// Independent per-game seed (splitmix64 of base and game id).
pub fn episode_seed(base: u64, game_id: u64) -> u64 {
    let mut z = base ^ game_id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone)]
pub struct ExecutedMove {
    pub game_id: u64,
    pub ply: u32,
    pub action: usize,
    pub player_to_move: u8,
    pub temperature: f32,
    pub pi: [f32; A],
    pub root_value: f32,
    /// The kicker moves again.
    pub bonus: bool,
}

#[derive(Debug, Clone)]
pub struct GameRecord {
    pub game_id: u64,
    pub outcome: Outcome,
    pub plies: u32,
    /// Present when the task recorded training samples.
    pub trajectory: Option<Trajectory>,
    pub fallbacks: u32,
}

/// One game driven to completion, one search per kick.
pub struct GameTask {
    pub game_id: u64,
    pub seed: u64,
    pub ply: u32,
    pub state: GameState,
    pub temperature_schedule: TemperatureSchedule,
    root_noise: bool,
    mcts: Mcts,
    traj: Option<TrajectoryBuilder>,
    fallbacks: u32,
}

impl GameTask {
    /// `record` keeps (state, pi) pairs for replay; `root_noise` enables
    /// Dirichlet noise at every root (self-play only).
    pub fn new(
        game_id: u64,
        seed: u64,
        max_moves: u16,
        mcts_cfg: MctsConfig,
        temperature_schedule: TemperatureSchedule,
        record: bool,
        root_noise: bool,
    ) -> Result<Self, GameTaskError> {
        Ok(Self {
            game_id,
            seed,
            ply: 0,
            state: initial_state(max_moves),
            temperature_schedule,
            root_noise,
            mcts: Mcts::new(mcts_cfg)?,
            traj: record.then(|| TrajectoryBuilder::new(game_id)),
            fallbacks: 0,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.outcome.is_some()
    }

    fn ply_seed(&self, salt: u64) -> u64 {
        self.seed ^ (self.ply as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ salt
    }

    /// Search from the current position and play one kick.
    ///
    /// The recorded policy is the visit distribution; temperature only shapes
    /// the executed move.
    pub fn step(&mut self, infer: &impl Inference) -> Result<ExecutedMove, GameTaskError> {
        let mode = if self.root_noise {
            SearchMode::SelfPlay {
                noise_seed: self.ply_seed(0x5EED_0F_D1E7),
            }
        } else {
            SearchMode::Eval
        };
        let sr = self.mcts.run_search(&self.state, mode, infer)?;
        self.fallbacks += sr.stats.fallbacks;

        let legal = legal_moves(&self.state);
        let t = self.temperature_schedule.at(self.ply);
        let exec_pi = apply_temperature(&sr.pi, &legal, t);
        let mut rng = ChaCha8Rng::seed_from_u64(self.ply_seed(0xD1E7_C437_9E37_79B9));
        let action = sample_action(&exec_pi, &mut rng);

        if let Some(b) = &mut self.traj {
            b.record(&self.state, &sr.pi);
        }

        let player = self.state.player_to_move;
        let next = apply_move(&self.state, action)?;
        let executed = ExecutedMove {
            game_id: self.game_id,
            ply: self.ply,
            action,
            player_to_move: player,
            temperature: t,
            pi: sr.pi,
            root_value: sr.root_value,
            bonus: !next.terminal && next.state.player_to_move == player,
        };
        self.state = next.state;
        self.ply += 1;
        Ok(executed)
    }

    pub fn finish(self) -> Result<GameRecord, GameTaskError> {
        let Some(outcome) = self.state.outcome else {
            return Err(GameTaskError::NotFinished(self.game_id));
        };
        Ok(GameRecord {
            game_id: self.game_id,
            outcome,
            plies: self.ply,
            trajectory: self.traj.map(|b| b.finish(outcome)),
            fallbacks: self.fallbacks,
        })
    }

    /// Play until the engine reports an outcome. The kick cap bounds the loop.
    pub fn play_to_end(mut self, infer: &impl Inference) -> Result<GameRecord, GameTaskError> {
        while !self.is_terminal() {
            self.step(infer)?;
        }
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_mcts::UniformInference;

    fn task(seed: u64, record: bool) -> GameTask {
        GameTask::new(
            0,
            seed,
            40,
            MctsConfig {
                simulations: 8,
                ..MctsConfig::default()
            },
            TemperatureSchedule::constant(1.0),
            record,
            true,
        )
        .unwrap()
    }

    #[test]
    fn same_seed_same_game() {
        let a = task(5, true).play_to_end(&UniformInference).unwrap();
        let b = task(5, true).play_to_end(&UniformInference).unwrap();
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.plies, b.plies);
        let (ta, tb) = (a.trajectory.unwrap(), b.trajectory.unwrap());
        assert_eq!(ta.samples, tb.samples);
        assert_eq!(ta.len() as u32, a.plies);
    }

    #[test]
    fn unfinished_game_cannot_be_finished() {
        let t = task(1, false);
        assert!(matches!(t.finish(), Err(GameTaskError::NotFinished(0))));
    }

    #[test]
    fn episode_seeds_are_distinct() {
        let seeds: std::collections::BTreeSet<u64> =
            (0..1000).map(|g| episode_seed(7, g)).collect();
        assert_eq!(seeds.len(), 1000);
        assert_ne!(episode_seed(1, 0), episode_seed(2, 0));
    }
}
