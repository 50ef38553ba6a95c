//! sc-core: paper soccer rules, state representation, feature encoding and configuration.

pub mod action;
pub mod config;
pub mod engine;
pub mod features;
pub mod legal;
pub mod state;

pub use action::{flip_action, from_pov_action, to_pov_action, Direction, A};
pub use config::{Config, ConfigError, LrScheduleKind, StartMode};
pub use engine::{apply_move, initial_state, is_terminal, ApplyError, Transition};
pub use features::{encode_state, F, NUM_CHANNELS};
pub use legal::{legal_moves, legal_moves_pov};
pub use state::{GameState, Outcome, Point, BALL_START, COLS, ROWS};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}
