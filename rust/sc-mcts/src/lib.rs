//! MCTS implementation (PUCT) for AlphaZero-style search.
//!
//! The design uses:
//! - Fixed action space `A=8` (sc-core)
//! - Deterministic transitions via `sc_core::apply_move`; bonus kicks keep the
//!   player to move, so value signs flip only when the mover changes
//! - A flat node vector rebuilt per search

pub mod infer;
pub mod infer_client;
pub mod mcts;
pub mod node;
pub mod tree;

pub use infer::{Inference, UniformInference};
pub use infer_client::InferBackend;
pub use mcts::{
    apply_temperature, masked_softmax, sample_action, uniform_over_legal, Mcts, MctsConfig,
    MctsError, SearchMode, SearchResult, SearchStats, MIN_TEMPERATURE,
};

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
