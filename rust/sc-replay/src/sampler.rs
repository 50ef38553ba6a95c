//! Uniform mini-batch sampling over every retained sealed shard.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;
use sc_core::{A, F};
use tracing::debug;

use crate::prune::list_shard_indices;
use crate::schema::{meta_path, safetensors_path, T_FEATURES, T_GAME_LEN, T_PI, T_Z};
use crate::store::{ReplayError, ShardMeta};

/// Decoded shard tensors, row-major.
#[derive(Debug, Clone)]
pub struct ShardData {
    pub idx: u64,
    pub features: Vec<f32>,
    pub pi: Vec<f32>,
    pub z: Vec<f32>,
    pub game_len: Vec<u32>,
}

impl ShardData {
    pub fn num_samples(&self) -> usize {
        self.z.len()
    }
}

/// One training mini-batch: `features [len, F]`, `pi [len, A]`, `z [len]`.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub features: Vec<f32>,
    pub pi: Vec<f32>,
    pub z: Vec<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

pub fn read_shard_meta(dir: &Path, idx: u64) -> Result<ShardMeta, ReplayError> {
    let bytes = fs::read(meta_path(dir, idx))?;
    let meta: ShardMeta = serde_json::from_slice(&bytes)?;
    if meta.feature_len != F || meta.action_space_a != A {
        return Err(ReplayError::Corrupt {
            idx,
            msg: format!(
                "shape mismatch: feature_len={} A={} (expected {F}, {A})",
                meta.feature_len, meta.action_space_a
            ),
        });
    }
    Ok(meta)
}

pub fn load_shard(dir: &Path, idx: u64) -> Result<ShardData, ReplayError> {
    let bytes = fs::read(safetensors_path(dir, idx))?;
    let st = SafeTensors::deserialize(&bytes)?;
    let corrupt = |msg: String| ReplayError::Corrupt { idx, msg };

    let features = f32_tensor(&st, T_FEATURES).map_err(corrupt)?;
    let pi = f32_tensor(&st, T_PI).map_err(corrupt)?;
    let z = f32_tensor(&st, T_Z).map_err(corrupt)?;
    let game_len = u32_tensor(&st, T_GAME_LEN).map_err(corrupt)?;

    let n = z.len();
    if features.len() != n * F || pi.len() != n * A {
        return Err(corrupt(format!(
            "tensor sizes disagree: features={} pi={} z={n}",
            features.len(),
            pi.len()
        )));
    }
    if game_len.iter().map(|&l| l as usize).sum::<usize>() != n {
        return Err(corrupt("game_len does not sum to sample count".to_string()));
    }
    Ok(ShardData {
        idx,
        features,
        pi,
        z,
        game_len,
    })
}

fn f32_tensor(st: &SafeTensors<'_>, name: &str) -> Result<Vec<f32>, String> {
    let t = st.tensor(name).map_err(|e| format!("{name}: {e}"))?;
    if t.dtype() != Dtype::F32 {
        return Err(format!("{name}: expected F32, got {:?}", t.dtype()));
    }
    Ok(t.data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn u32_tensor(st: &SafeTensors<'_>, name: &str) -> Result<Vec<u32>, String> {
    let t = st.tensor(name).map_err(|e| format!("{name}: {e}"))?;
    if t.dtype() != Dtype::U32 {
        return Err(format!("{name}: expected U32, got {:?}", t.dtype()));
    }
    Ok(t.data()
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Reader over a replay directory.
///
/// The view of the directory is fixed between calls to [`ReplaySampler::refresh`].
/// A shard is picked with probability proportional to its sample count, so every
/// retained sample is equally likely.
pub struct ReplaySampler {
    dir: PathBuf,
    max_cached: usize,
    /// (shard idx, cumulative sample count up to and including it)
    index: Vec<(u64, usize)>,
    cache: HashMap<u64, Arc<ShardData>>,
    cache_order: VecDeque<u64>,
}

impl ReplaySampler {
    pub fn new(dir: impl Into<PathBuf>, max_cached: usize) -> Self {
        Self {
            dir: dir.into(),
            max_cached: max_cached.max(1),
            index: Vec::new(),
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
        }
    }

    /// Re-read shard metadata. Shards without a meta record are not yet sealed
    /// and are skipped. Returns the number of visible shards.
    pub fn refresh(&mut self) -> Result<usize, ReplayError> {
        let mut index = Vec::new();
        let mut total = 0usize;
        for idx in list_shard_indices(&self.dir)? {
            if !meta_path(&self.dir, idx).exists() {
                continue;
            }
            let meta = read_shard_meta(&self.dir, idx)?;
            if meta.num_samples == 0 {
                continue;
            }
            total += meta.num_samples;
            index.push((idx, total));
        }
        self.cache.retain(|idx, _| index.iter().any(|&(i, _)| i == *idx));
        let cache = &self.cache;
        self.cache_order.retain(|idx| cache.contains_key(idx));
        self.index = index;
        debug!(shards = self.index.len(), samples = total, "replay view refreshed");
        Ok(self.index.len())
    }

    pub fn num_shards(&self) -> usize {
        self.index.len()
    }

    pub fn total_samples(&self) -> usize {
        self.index.last().map(|&(_, c)| c).unwrap_or(0)
    }

    /// Draw `batch_size` samples uniformly with replacement.
    pub fn sample_batch(
        &mut self,
        batch_size: usize,
        rng: &mut impl Rng,
    ) -> Result<Batch, ReplayError> {
        let total = self.total_samples();
        if total == 0 {
            return Err(ReplayError::Empty);
        }

        // (shard position, row in shard, output row); grouped so each shard loads once.
        let mut picks: Vec<(usize, usize, usize)> = (0..batch_size)
            .map(|out| {
                let g = rng.gen_range(0..total);
                let pos = self.index.partition_point(|&(_, cum)| cum <= g);
                let start = if pos == 0 { 0 } else { self.index[pos - 1].1 };
                (pos, g - start, out)
            })
            .collect();
        picks.sort_unstable();

        let mut batch = Batch {
            features: vec![0.0; batch_size * F],
            pi: vec![0.0; batch_size * A],
            z: vec![0.0; batch_size],
        };
        let mut i = 0;
        while i < picks.len() {
            let pos = picks[i].0;
            let (idx, cum) = self.index[pos];
            let expected = cum - if pos == 0 { 0 } else { self.index[pos - 1].1 };
            let shard = self.get_shard(idx)?;
            if shard.num_samples() != expected {
                return Err(ReplayError::Corrupt {
                    idx,
                    msg: format!(
                        "meta says {expected} samples, tensors hold {}",
                        shard.num_samples()
                    ),
                });
            }
            while i < picks.len() && picks[i].0 == pos {
                let (_, row, out) = picks[i];
                batch.features[out * F..(out + 1) * F]
                    .copy_from_slice(&shard.features[row * F..(row + 1) * F]);
                batch.pi[out * A..(out + 1) * A]
                    .copy_from_slice(&shard.pi[row * A..(row + 1) * A]);
                batch.z[out] = shard.z[row];
                i += 1;
            }
        }
        Ok(batch)
    }

    fn get_shard(&mut self, idx: u64) -> Result<Arc<ShardData>, ReplayError> {
        if let Some(s) = self.cache.get(&idx) {
            return Ok(Arc::clone(s));
        }
        let data = Arc::new(load_shard(&self.dir, idx)?);
        while self.cache.len() >= self.max_cached {
            match self.cache_order.pop_front() {
                Some(old) => {
                    self.cache.remove(&old);
                }
                None => break,
            }
        }
        self.cache.insert(idx, Arc::clone(&data));
        self.cache_order.push_back(idx);
        Ok(data)
    }
}
