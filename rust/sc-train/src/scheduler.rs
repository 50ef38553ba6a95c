//! Learning rate as a function of the global optimizer step.

use sc_core::{Config, LrScheduleKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrSchedule {
    pub kind: LrScheduleKind,
    pub initial_lr: f64,
    pub decay_factor: f64,
    /// Staircase width in steps.
    pub decay_steps: u64,
    /// Steps in a full run; progress `p = step / horizon`.
    pub horizon: u64,
}

impl LrSchedule {
    pub fn from_config(cfg: &Config) -> Self {
        let horizon = cfg.training_horizon().max(1);
        Self {
            kind: cfg.training.lrschedule,
            initial_lr: cfg.training.initial_lr,
            decay_factor: cfg.training.lr_decay_factor,
            decay_steps: cfg
                .training
                .lr_decay_steps
                .unwrap_or((horizon / 4).max(1))
                .max(1),
            horizon,
        }
    }

    pub fn value_at(&self, step: u64) -> f64 {
        let lr = self.initial_lr;
        let p = step as f64 / self.horizon.max(1) as f64;
        match self.kind {
            LrScheduleKind::Constant => lr,
            LrScheduleKind::Linear => lr * (1.0 - p).max(0.0),
            LrScheduleKind::Staircase => {
                let stairs = (step / self.decay_steps.max(1)) as i32;
                lr * self.decay_factor.powi(stairs)
            }
            LrScheduleKind::MiddleDrop => {
                if p < 0.75 {
                    lr
                } else {
                    lr * 0.1
                }
            }
            LrScheduleKind::DoubleLinearCon => {
                if p < 0.5 {
                    lr * (1.0 - 0.9 * (p / 0.5))
                } else {
                    lr * 0.1
                }
            }
            LrScheduleKind::DoubleMiddleDrop => {
                if p < 0.5 {
                    lr
                } else if p < 0.75 {
                    lr * 0.1
                } else {
                    lr * 0.01
                }
            }
        }
    }
}
