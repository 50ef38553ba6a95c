//! sc-nn: the policy/value network, the training/best parameter pair, and
//! versioned checkpoints on disk.

pub mod checkpoint;
pub mod net;
pub mod pair;

pub use checkpoint::{CheckpointError, CheckpointMeta, CheckpointStore, LatestPointer};
pub use net::{select_device, NetConfig, PolicyValueNet};
pub use pair::NetworkPair;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
