//! Shard discovery and retention.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::schema::{meta_path, parse_shard_idx, safetensors_path};
use crate::store::ReplayError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub before_shards: usize,
    pub after_shards: usize,
    pub deleted_shards: usize,
    pub deleted_min_idx: Option<u64>,
    pub deleted_max_idx: Option<u64>,
}

/// Sorted indices of every shard with at least one file present.
pub fn list_shard_indices(dir: &Path) -> Result<Vec<u64>, ReplayError> {
    let mut out = BTreeSet::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    for entry in fs::read_dir(dir)? {
        let e = entry?;
        if let Some(idx) = e.file_name().to_str().and_then(parse_shard_idx) {
            out.insert(idx);
        }
    }
    Ok(out.into_iter().collect())
}

/// Keep the `keep` highest shard indices and delete every older pair.
pub fn prune_shards_by_idx(dir: &Path, keep: usize) -> Result<PruneReport, ReplayError> {
    let all = list_shard_indices(dir)?;
    let before = all.len();
    let n_delete = before.saturating_sub(keep);
    let doomed = &all[..n_delete];
    for &idx in doomed {
        // Meta first: a shard without meta is invisible to readers.
        remove_if_exists(&meta_path(dir, idx))?;
        remove_if_exists(&safetensors_path(dir, idx))?;
    }
    Ok(PruneReport {
        before_shards: before,
        after_shards: before - n_delete,
        deleted_shards: n_delete,
        deleted_min_idx: doomed.first().copied(),
        deleted_max_idx: doomed.last().copied(),
    })
}

fn remove_if_exists(p: &Path) -> Result<(), ReplayError> {
    match fs::remove_file(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
