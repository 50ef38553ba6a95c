//! sc-replay: safetensors replay shards.
//!
//! Workers hand finished games to a [`ReplayStore`], which seals a shard once it
//! holds the configured number of games. The trainer reads sealed shards through
//! a [`ReplaySampler`].

pub mod prune;
pub mod sampler;
pub mod schema;
pub mod store;
pub mod trajectory;

pub use prune::{list_shard_indices, prune_shards_by_idx, PruneReport};
pub use sampler::{load_shard, read_shard_meta, Batch, ReplaySampler, ShardData};
pub use store::{
    cleanup_tmp_files, write_shard, ReplayError, ReplayStore, SealedShard, ShardMeta, StoreConfig,
};
pub use trajectory::{ReplaySample, Trajectory, TrajectoryBuilder};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

#[cfg(test)]
mod store_tests;
