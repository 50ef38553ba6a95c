use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use bytemuck::cast_slice;
use safetensors::tensor::{Dtype, TensorView};
use sc_core::features::FEATURE_SCHEMA_ID;
use sc_core::{A, F};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::prune::{list_shard_indices, prune_shards_by_idx, PruneReport};
use crate::schema::{
    meta_path, safetensors_path, ACTION_SPACE_ID, PROTOCOL_VERSION, RULESET_ID, T_FEATURES,
    T_GAME_LEN, T_PI, T_Z,
};
use crate::trajectory::Trajectory;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("safetensors: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),
    #[error("invalid sample: {0}")]
    InvalidSample(&'static str),
    #[error("corrupt shard {idx}: {msg}")]
    Corrupt { idx: u64, msg: String },
    #[error("replay buffer is empty")]
    Empty,
    #[error("shard {idx} write failed after {attempts} attempts: {source}")]
    WriteFailed {
        idx: u64,
        attempts: u32,
        #[source]
        source: Box<ReplayError>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMeta {
    pub protocol_version: u32,
    pub feature_schema_id: u32,
    pub feature_len: usize,
    pub action_space_id: String,
    pub action_space_a: usize,
    pub ruleset_id: String,

    pub shard_idx: u64,
    pub num_games: usize,
    pub num_samples: usize,

    pub git_hash: Option<String>,
    pub config_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub out_dir: PathBuf,
    pub games_per_shard: usize,
    /// Newest shards kept on disk after each seal.
    pub keep_shards: usize,
    /// Extra attempts after a failed write.
    pub write_retries: u32,
    /// Backoff unit; attempt `k` sleeps `k * retry_backoff`.
    pub retry_backoff: Duration,
    pub git_hash: Option<String>,
    pub config_hash: Option<String>,
}

impl StoreConfig {
    pub fn new(out_dir: impl Into<PathBuf>, cfg: &sc_core::config::ReplayConfig) -> Self {
        Self {
            out_dir: out_dir.into(),
            games_per_shard: cfg.n_games_in_replay_checkpoint as usize,
            keep_shards: cfg.n_replays as usize,
            write_retries: cfg.write_retries,
            retry_backoff: Duration::from_millis(100),
            git_hash: None,
            config_hash: None,
        }
    }
}

/// Result of one seal.
#[derive(Debug, Clone)]
pub struct SealedShard {
    pub idx: u64,
    pub num_games: usize,
    pub num_samples: usize,
    pub pruned: PruneReport,
}

struct OpenShard {
    idx: u64,
    games: Vec<Trajectory>,
}

/// Open shard shared by all self-play workers.
///
/// Appends and seals happen under one lock, so each shard is sealed exactly once
/// and no game lands in two shards.
pub struct ReplayStore {
    cfg: StoreConfig,
    open: Mutex<OpenShard>,
}

impl ReplayStore {
    pub fn open(cfg: StoreConfig) -> Result<Self, ReplayError> {
        if cfg.games_per_shard == 0 {
            return Err(ReplayError::InvalidSample("games_per_shard must be > 0"));
        }
        if cfg.keep_shards == 0 {
            return Err(ReplayError::InvalidSample("keep_shards must be > 0"));
        }
        fs::create_dir_all(&cfg.out_dir)?;
        cleanup_tmp_files(&cfg.out_dir)?;
        // Never overwrite shards from an earlier process.
        let next_idx = list_shard_indices(&cfg.out_dir)?
            .last()
            .map(|&i| i + 1)
            .unwrap_or(0);
        Ok(Self {
            open: Mutex::new(OpenShard {
                idx: next_idx,
                games: Vec::with_capacity(cfg.games_per_shard),
            }),
            cfg,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cfg.out_dir
    }

    /// Games in the open shard.
    pub fn open_games(&self) -> usize {
        self.lock().games.len()
    }

    /// Index the open shard will be sealed under.
    pub fn next_shard_idx(&self) -> u64 {
        self.lock().idx
    }

    /// Append one finished game; seals and persists the shard when it is full.
    ///
    /// On a persistent write failure the games stay in the open shard and the
    /// error is returned.
    pub fn append(&self, traj: Trajectory) -> Result<Option<SealedShard>, ReplayError> {
        let mut open = self.lock();
        open.games.push(traj);
        if open.games.len() < self.cfg.games_per_shard {
            return Ok(None);
        }

        let idx = open.idx;
        let n = self.cfg.games_per_shard;
        self.write_with_retries(idx, &open.games[..n])?;
        let sealed: Vec<Trajectory> = open.games.drain(..n).collect();
        open.idx += 1;
        drop(open);

        let num_samples = sealed.iter().map(Trajectory::len).sum();
        let pruned = prune_shards_by_idx(&self.cfg.out_dir, self.cfg.keep_shards)?;
        info!(
            shard = idx,
            games = n,
            samples = num_samples,
            pruned = pruned.deleted_shards,
            "replay shard sealed"
        );
        Ok(Some(SealedShard {
            idx,
            num_games: n,
            num_samples,
            pruned,
        }))
    }

    fn write_with_retries(&self, idx: u64, games: &[Trajectory]) -> Result<(), ReplayError> {
        let attempts = self.cfg.write_retries + 1;
        let mut last = None;
        for attempt in 1..=attempts {
            match write_shard(&self.cfg, idx, games) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(shard = idx, attempt, error = %e, "replay shard write failed");
                    last = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.cfg.retry_backoff * attempt);
                    }
                }
            }
        }
        let source = last.unwrap_or(ReplayError::InvalidSample("no write attempted"));
        Err(ReplayError::WriteFailed {
            idx,
            attempts,
            source: Box::new(source),
        })
    }

    /// Drop the open shard and report how many games it held. Those games are
    /// never persisted.
    pub fn close(self) -> usize {
        self.discard_open()
    }

    fn discard_open(&self) -> usize {
        let mut open = self.lock();
        let n = open.games.len();
        if n > 0 {
            warn!(
                shard = open.idx,
                games = n,
                games_per_shard = self.cfg.games_per_shard,
                "discarding games of an unsealed replay shard"
            );
        }
        open.games.clear();
        n
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OpenShard> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReplayStore {
    fn drop(&mut self) {
        self.discard_open();
    }
}

/// Persist `games` as shard `idx`: tensors first, then the meta record, each via
/// a temp file and rename. Readers discover shards through the meta file.
pub fn write_shard(
    cfg: &StoreConfig,
    idx: u64,
    games: &[Trajectory],
) -> Result<ShardMeta, ReplayError> {
    let n: usize = games.iter().map(Trajectory::len).sum();
    if n == 0 {
        return Err(ReplayError::InvalidSample("shard has no samples"));
    }

    let mut features = Vec::<f32>::with_capacity(n * F);
    let mut pi = Vec::<f32>::with_capacity(n * A);
    let mut z = Vec::<f32>::with_capacity(n);
    let mut game_len = Vec::<u32>::with_capacity(games.len());

    for g in games {
        game_len.push(g.len() as u32);
        for s in &g.samples {
            if s.features.len() != F {
                return Err(ReplayError::InvalidSample("feature length != F"));
            }
            features.extend_from_slice(&s.features);
            pi.extend_from_slice(&s.pi);
            z.push(s.z);
        }
    }

    let mut tensors: BTreeMap<String, TensorView<'_>> = BTreeMap::new();
    tensors.insert(
        T_FEATURES.to_string(),
        TensorView::new(Dtype::F32, vec![n, F], cast_slice(&features))?,
    );
    tensors.insert(
        T_PI.to_string(),
        TensorView::new(Dtype::F32, vec![n, A], cast_slice(&pi))?,
    );
    tensors.insert(
        T_Z.to_string(),
        TensorView::new(Dtype::F32, vec![n], cast_slice(&z))?,
    );
    tensors.insert(
        T_GAME_LEN.to_string(),
        TensorView::new(Dtype::U32, vec![games.len()], cast_slice(&game_len))?,
    );

    let final_st = safetensors_path(&cfg.out_dir, idx);
    let tmp_st = final_st.with_extension("safetensors.tmp");
    let final_meta = meta_path(&cfg.out_dir, idx);
    let tmp_meta = final_meta.with_extension("json.tmp");

    let st_bytes = safetensors::serialize(&tensors, &None)?;
    fs::write(&tmp_st, st_bytes)?;
    fs::rename(&tmp_st, &final_st)?;

    let meta = ShardMeta {
        protocol_version: PROTOCOL_VERSION,
        feature_schema_id: FEATURE_SCHEMA_ID,
        feature_len: F,
        action_space_id: ACTION_SPACE_ID.to_string(),
        action_space_a: A,
        ruleset_id: RULESET_ID.to_string(),
        shard_idx: idx,
        num_games: games.len(),
        num_samples: n,
        git_hash: cfg.git_hash.clone(),
        config_hash: cfg.config_hash.clone(),
    };
    fs::write(&tmp_meta, serde_json::to_vec_pretty(&meta)?)?;
    fs::rename(&tmp_meta, &final_meta)?;
    Ok(meta)
}

pub fn cleanup_tmp_files(dir: &Path) -> Result<(), ReplayError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let e = entry?;
        let p = e.path();
        if let Some(name) = p.file_name().and_then(|s| s.to_str()) {
            if name.ends_with(".safetensors.tmp") || name.ends_with(".meta.json.tmp") {
                let _ = fs::remove_file(&p);
            }
        }
    }
    Ok(())
}
