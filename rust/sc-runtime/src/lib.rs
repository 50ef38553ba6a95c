//! Worker runtime: one [`GameTask`] per game, a thread pool per self-play round.

pub mod game_task;
pub mod pool;
pub mod temperature;

pub use game_task::{episode_seed, ExecutedMove, GameRecord, GameTask, GameTaskError};
pub use pool::{games_for_round, run_selfplay_round, RoundConfig, RoundReport, RuntimeError};
pub use temperature::TemperatureSchedule;

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
