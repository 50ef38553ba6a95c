//! Executed-move temperature as a function of the kick index.

use sc_core::config::{GatingConfig, SelfplayConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSchedule {
    pub initial: f32,
    pub decay_factor: f32,
    /// Kicks played at `initial` before decay starts.
    pub moves_before_decaying: u32,
}

impl TemperatureSchedule {
    pub fn constant(t: f32) -> Self {
        Self {
            initial: t,
            decay_factor: 1.0,
            moves_before_decaying: 0,
        }
    }

    pub fn selfplay(cfg: &SelfplayConfig) -> Self {
        Self {
            initial: cfg.initial_temperature,
            decay_factor: cfg.temperature_decay_factor,
            moves_before_decaying: cfg.moves_before_decaying,
        }
    }

    /// Gate games start at `evaluation_temperature` and decay like self-play.
    pub fn evaluation(gating: &GatingConfig, selfplay: &SelfplayConfig) -> Self {
        Self {
            initial: gating.evaluation_temperature,
            ..Self::selfplay(selfplay)
        }
    }

    /// Temperature at 0-based kick `m`; bonus kicks count.
    pub fn at(&self, m: u32) -> f32 {
        if m < self.moves_before_decaying {
            self.initial
        } else {
            let k = (m - self.moves_before_decaying + 1) as i32;
            self.initial * self.decay_factor.powi(k)
        }
    }
}
