//! Per-game recording and value-target back-fill.

use sc_core::{encode_state, to_pov_action, GameState, Outcome, A};

/// One training decision sample. Features and policy are in the mover's frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplaySample {
    pub features: Vec<f32>,
    pub pi: [f32; A],
    pub z: f32,
}

/// A finished game with value targets filled in.
#[derive(Clone, Debug)]
pub struct Trajectory {
    pub game_id: u64,
    pub outcome: Outcome,
    pub samples: Vec<ReplaySample>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

struct Step {
    features: Vec<f32>,
    pi: [f32; A],
    player: u8,
}

/// Collects (state, search policy, mover) for one game until its outcome is known.
pub struct TrajectoryBuilder {
    game_id: u64,
    steps: Vec<Step>,
}

impl TrajectoryBuilder {
    pub fn new(game_id: u64) -> Self {
        Self {
            game_id,
            steps: Vec::with_capacity(64),
        }
    }

    /// Record a decision; `pi` is the search policy over absolute directions.
    pub fn record(&mut self, state: &GameState, pi: &[f32; A]) {
        let player = state.player_to_move;
        let mut pov_pi = [0.0f32; A];
        for (a, &p) in pi.iter().enumerate() {
            pov_pi[to_pov_action(a, player)] = p;
        }
        self.steps.push(Step {
            features: encode_state(state),
            pi: pov_pi,
            player,
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Back-fill `z` per step from the recorded mover; bonus kicks keep the sign.
    pub fn finish(self, outcome: Outcome) -> Trajectory {
        let samples = self
            .steps
            .into_iter()
            .map(|s| ReplaySample {
                z: outcome.z_for(s.player),
                features: s.features,
                pi: s.pi,
            })
            .collect();
        Trajectory {
            game_id: self.game_id,
            outcome,
            samples,
        }
    }
}
