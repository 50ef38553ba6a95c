//! sc-train: one optimizer step at a time on the "training" parameters.
//!
//! The [`Learner`] owns the network pair and the momentum buffers. It lives on the
//! inference thread; training steps, promotion and checkpoint IO reach it as
//! exclusive jobs.

pub mod clip;
pub mod learner;
pub mod optimizer;
pub mod scheduler;

pub use clip::{clip_grad_store, grad_norm};
pub use learner::{Learner, LearnerConfig, StepMetrics, TrainError};
pub use optimizer::MomentumSgd;
pub use scheduler::LrSchedule;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");


#[cfg(test)]
mod learner_tests;
