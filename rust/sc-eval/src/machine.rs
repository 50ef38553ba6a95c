//! Gate state machine and the promotion rule.

use sc_core::Outcome;

use crate::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Playing,
    Deciding,
    Promoted,
    Rejected,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Idle => "idle",
            GateState::Playing => "playing",
            GateState::Deciding => "deciding",
            GateState::Promoted => "promoted",
            GateState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Promote,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Promote => "promote",
            Decision::Reject => "reject",
        }
    }
}

/// Promote iff `win_rate >= threshold`.
pub fn decide(win_rate: f64, threshold: f64) -> Decision {
    if win_rate >= threshold {
        Decision::Promote
    } else {
        Decision::Reject
    }
}

/// Results from the challenger's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateTally {
    pub games: u32,
    pub cand_wins: u32,
    pub cand_losses: u32,
    pub draws: u32,
    pub plies: u64,
}

impl GateTally {
    pub fn record(&mut self, outcome: Outcome, cand_seat: u8, plies: u32) {
        self.games += 1;
        self.plies += plies as u64;
        match outcome {
            Outcome::Winner(p) if p == cand_seat => self.cand_wins += 1,
            Outcome::Winner(_) => self.cand_losses += 1,
            Outcome::Draw => self.draws += 1,
        }
    }

    pub fn merge(&mut self, other: &GateTally) {
        self.games += other.games;
        self.cand_wins += other.cand_wins;
        self.cand_losses += other.cand_losses;
        self.draws += other.draws;
        self.plies += other.plies;
    }

    /// `(wins + 0.5 * draws) / games`; 0 for an empty tally.
    pub fn win_rate(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        (self.cand_wins as f64 + 0.5 * self.draws as f64) / self.games as f64
    }

    pub fn draw_rate(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        self.draws as f64 / self.games as f64
    }

    pub fn mean_game_len(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        self.plies as f64 / self.games as f64
    }
}

/// One gate cycle. Transitions outside the documented graph are errors.
#[derive(Debug, Clone)]
pub struct Gate {
    state: GateState,
    threshold: f64,
    total: u32,
    tally: GateTally,
}

impl Gate {
    pub fn new(threshold: f64) -> Result<Self, GateError> {
        if !(threshold.is_finite() && (0.0..=1.0).contains(&threshold)) {
            return Err(GateError::InvalidConfig(
                "gating.new_best_model_threshold must be in [0, 1]",
            ));
        }
        Ok(Self {
            state: GateState::Idle,
            threshold,
            total: 0,
            tally: GateTally::default(),
        })
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn tally(&self) -> &GateTally {
        &self.tally
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    fn expect(&self, want: GateState, action: &'static str) -> Result<(), GateError> {
        if self.state != want {
            return Err(GateError::InvalidTransition {
                from: self.state,
                action,
            });
        }
        Ok(())
    }

    /// `Idle -> Playing` for `total` games.
    pub fn begin(&mut self, total: u32) -> Result<(), GateError> {
        self.expect(GateState::Idle, "begin")?;
        if total == 0 {
            return Err(GateError::InvalidConfig(
                "gating.n_evaluation_games must be > 0",
            ));
        }
        self.total = total;
        self.tally = GateTally::default();
        self.state = GateState::Playing;
        Ok(())
    }

    /// Record one finished game; the last one moves the gate to `Deciding`.
    pub fn record(&mut self, outcome: Outcome, cand_seat: u8, plies: u32) -> Result<(), GateError> {
        self.expect(GateState::Playing, "record a game")?;
        self.tally.record(outcome, cand_seat, plies);
        if self.tally.games == self.total {
            self.state = GateState::Deciding;
        }
        Ok(())
    }

    /// `Deciding -> Promoted | Rejected`. The caller performs the promotion itself.
    pub fn decide(&mut self) -> Result<Decision, GateError> {
        self.expect(GateState::Deciding, "decide")?;
        let d = decide(self.tally.win_rate(), self.threshold);
        self.state = match d {
            Decision::Promote => GateState::Promoted,
            Decision::Reject => GateState::Rejected,
        };
        Ok(d)
    }

    /// Close a decided cycle and return its tally.
    pub fn reset(&mut self) -> Result<GateTally, GateError> {
        if !matches!(self.state, GateState::Promoted | GateState::Rejected) {
            return Err(GateError::InvalidTransition {
                from: self.state,
                action: "reset",
            });
        }
        self.state = GateState::Idle;
        self.total = 0;
        Ok(std::mem::take(&mut self.tally))
    }

    /// Drop an unfinished cycle, e.g. after a failed game.
    pub fn abort(&mut self) {
        self.state = GateState::Idle;
        self.total = 0;
        self.tally = GateTally::default();
    }
}
