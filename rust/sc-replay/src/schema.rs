//! Replay tensor schema + ids.

use std::path::{Path, PathBuf};

/// Protocol version for replay shards.
pub const PROTOCOL_VERSION: u32 = 1;

/// Action space id: eight kick directions in the mover's frame.
pub const ACTION_SPACE_ID: &str = "paper_soccer_dir8_pov_v1";

/// Ruleset id.
pub const RULESET_ID: &str = "paper_soccer_11x9_v1";

/// Tensor names inside safetensors.
pub const T_FEATURES: &str = "features";
pub const T_PI: &str = "pi";
pub const T_Z: &str = "z";
pub const T_GAME_LEN: &str = "game_len";

pub fn safetensors_path(dir: &Path, idx: u64) -> PathBuf {
    dir.join(format!("shard_{idx:06}.safetensors"))
}

pub fn meta_path(dir: &Path, idx: u64) -> PathBuf {
    dir.join(format!("shard_{idx:06}.meta.json"))
}

/// Shard index from a `shard_NNNNNN.{safetensors,meta.json}` file name.
pub fn parse_shard_idx(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("shard_")?;
    let digits = rest
        .strip_suffix(".safetensors")
        .or_else(|| rest.strip_suffix(".meta.json"))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
