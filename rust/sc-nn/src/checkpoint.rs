//! Versioned checkpoint directories under `models/`.
//!
//! ```text
//! models/latest.json            {version, step, iteration}
//! models/ckpt_000007/meta.json  CheckpointMeta
//! models/ckpt_000007/*.safetensors
//! ```
//!
//! A checkpoint is written into `ckpt_NNNNNN.tmp/`, its meta record added last,
//! and the directory renamed into place before `latest.json` moves. Discovery
//! goes through `latest.json` and the meta record, never through directory names.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const LATEST_FILE: &str = "latest.json";
pub const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("checkpoint file missing: {0}")]
    Missing(PathBuf),
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),
    #[error("checkpoint already exists: {0}")]
    Exists(PathBuf),
}

/// Pointer to the newest complete checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub version: u64,
    pub step: u64,
    pub iteration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub version: u64,
    /// Optimizer steps taken when the checkpoint was written.
    pub step: u64,
    /// Completed controller iterations.
    pub iteration: u64,
    pub created_ts_ms: u64,
    pub feature_schema_id: u32,
    pub ruleset_id: String,
    pub n_kernels: usize,
    pub residual_blocks: usize,
    /// Files inside the checkpoint directory.
    pub files: Vec<String>,
    #[serde(default)]
    pub promotions: u64,
    #[serde(default)]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub git_hash: Option<String>,
}

impl CheckpointMeta {
    pub fn pointer(&self) -> LatestPointer {
        LatestPointer {
            version: self.version,
            step: self.step,
            iteration: self.iteration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    models_dir: PathBuf,
    keep: usize,
}

impl CheckpointStore {
    pub fn open(models_dir: impl Into<PathBuf>, keep: usize) -> Result<Self, CheckpointError> {
        let models_dir = models_dir.into();
        fs::create_dir_all(&models_dir)?;
        let store = Self {
            models_dir,
            keep: keep.max(1),
        };
        store.cleanup_tmp_dirs()?;
        Ok(store)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn ckpt_dir(&self, version: u64) -> PathBuf {
        self.models_dir.join(format!("ckpt_{version:06}"))
    }

    fn tmp_dir(&self, version: u64) -> PathBuf {
        self.models_dir.join(format!("ckpt_{version:06}.tmp"))
    }

    /// `None` when no checkpoint was ever committed. A pointer that exists but
    /// cannot be parsed is an error.
    pub fn read_latest(&self) -> Result<Option<LatestPointer>, CheckpointError> {
        let path = self.models_dir.join(LATEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let p: LatestPointer = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(Some(p))
    }

    pub fn read_meta(&self, version: u64) -> Result<CheckpointMeta, CheckpointError> {
        let path = self.ckpt_dir(version).join(META_FILE);
        if !path.exists() {
            return Err(CheckpointError::Missing(path));
        }
        let meta: CheckpointMeta = serde_json::from_slice(&fs::read(&path)?)
            .map_err(|e| CheckpointError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(meta)
    }

    /// Follow `latest.json` to a complete checkpoint; every listed file must exist
    /// and the meta record must agree with the pointer.
    pub fn resolve_latest(&self) -> Result<Option<(CheckpointMeta, PathBuf)>, CheckpointError> {
        let Some(ptr) = self.read_latest()? else {
            return Ok(None);
        };
        let meta = self.read_meta(ptr.version)?;
        if meta.pointer() != ptr {
            return Err(CheckpointError::Corrupt(format!(
                "latest.json {ptr:?} disagrees with meta {:?}",
                meta.pointer()
            )));
        }
        let dir = self.ckpt_dir(ptr.version);
        for f in &meta.files {
            let p = dir.join(f);
            if !p.exists() {
                return Err(CheckpointError::Missing(p));
            }
        }
        Ok(Some((meta, dir)))
    }

    /// Write checkpoint `meta.version`. `write_files` fills the staging directory
    /// with `meta.files`. The pointer moves only after the directory is complete.
    /// A committed version is never replaced.
    pub fn commit<F>(&self, meta: &CheckpointMeta, write_files: F) -> Result<PathBuf, CheckpointError>
    where
        F: FnOnce(&Path) -> Result<(), CheckpointError>,
    {
        let dir = self.ckpt_dir(meta.version);
        if dir.exists() {
            return Err(CheckpointError::Exists(dir));
        }
        let tmp = self.tmp_dir(meta.version);
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;
        write_files(&tmp)?;
        for f in &meta.files {
            if !tmp.join(f).exists() {
                return Err(CheckpointError::Missing(tmp.join(f)));
            }
        }
        fs::write(tmp.join(META_FILE), serde_json::to_vec_pretty(meta)?)?;

        fs::rename(&tmp, &dir)?;
        sc_logging::write_bytes_atomic(
            self.models_dir.join(LATEST_FILE),
            &serde_json::to_vec_pretty(&meta.pointer())?,
        )?;
        info!(
            version = meta.version,
            step = meta.step,
            iteration = meta.iteration,
            "checkpoint committed"
        );
        self.prune()?;
        Ok(dir)
    }

    /// Versions with a checkpoint directory, ascending.
    pub fn list_versions(&self) -> Result<Vec<u64>, CheckpointError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.models_dir)? {
            let e = entry?;
            if !e.file_type()?.is_dir() {
                continue;
            }
            let name = e.file_name();
            let Some(v) = name
                .to_str()
                .and_then(|n| n.strip_prefix("ckpt_"))
                .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|d| d.parse::<u64>().ok())
            else {
                continue;
            };
            out.push(v);
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Delete all but the `keep` newest checkpoints; the pointed-to one always survives.
    pub fn prune(&self) -> Result<usize, CheckpointError> {
        let latest = self.read_latest()?.map(|p| p.version);
        let versions = self.list_versions()?;
        let n_delete = versions.len().saturating_sub(self.keep);
        let mut deleted = 0;
        for &v in &versions[..n_delete] {
            if Some(v) == latest {
                continue;
            }
            fs::remove_dir_all(self.ckpt_dir(v))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn cleanup_tmp_dirs(&self) -> Result<(), CheckpointError> {
        for entry in fs::read_dir(&self.models_dir)? {
            let p = entry?.path();
            let is_tmp = p
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("ckpt_") && n.ends_with(".tmp"));
            if is_tmp && p.is_dir() {
                warn!(path = %p.display(), "removing unfinished checkpoint staging dir");
                let _ = fs::remove_dir_all(&p);
            }
        }
        Ok(())
    }
}
