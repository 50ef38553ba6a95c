//! sc-logging: NDJSON events, the run manifest and tracing setup.
//!
//! Append-only NDJSON logs are the post-mortem record of a run; `run.json`
//! is the live summary that the controller rewrites atomically.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod events;

pub use events::{
    CheckpointEventV1, GateEventV1, InferStatsV1, SelfplayRoundEventV1, TrainStepEventV1,
    VersionInfoV1,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run manifest schema version.
pub const RUN_MANIFEST_VERSION: u32 = 1;

/// Rules identifier recorded with every run.
pub const RULESET_ID: &str = "paper_soccer_11x9_v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunManifestV1 {
    pub run_manifest_version: u32,

    pub run_id: String,
    pub created_ts_ms: u64,

    pub feature_schema_id: u32,
    pub action_space_a: u32,
    pub ruleset_id: String,

    // Hashes for reproducibility.
    pub git_hash: Option<String>,
    pub config_hash: Option<String>,

    // Layout.
    pub replay_dir: String,
    pub logs_dir: String,
    pub models_dir: String,

    // Controller status.
    #[serde(default)]
    pub controller_phase: Option<String>,
    #[serde(default)]
    pub controller_status: Option<String>,
    #[serde(default)]
    pub controller_iteration: u64,
    #[serde(default)]
    pub controller_error: Option<String>,
    #[serde(default)]
    pub controller_last_ts_ms: Option<u64>,

    // Counters.
    #[serde(default)]
    pub selfplay_games_completed: u64,
    #[serde(default)]
    pub selfplay_games_aborted: u64,
    #[serde(default)]
    pub train_step: u64,
    #[serde(default)]
    pub checkpoint_version: u64,

    // Last training round.
    #[serde(default)]
    pub last_total_loss: Option<f64>,
    #[serde(default)]
    pub last_policy_loss: Option<f64>,
    #[serde(default)]
    pub last_value_loss: Option<f64>,
    #[serde(default)]
    pub last_lr: Option<f64>,

    // Gating/promotion.
    #[serde(default)]
    pub promotions: u64,
    #[serde(default)]
    pub promotion_decision: Option<String>, // "promote" | "reject"
    #[serde(default)]
    pub promotion_ts_ms: Option<u64>,
    #[serde(default)]
    pub gate_games: Option<u64>,
    #[serde(default)]
    pub gate_win_rate: Option<f64>,
    #[serde(default)]
    pub gate_draw_rate: Option<f64>,
    #[serde(default)]
    pub gate_seeds_hash: Option<String>,
}

pub fn now_ms() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as u64
}

pub fn hash_config_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn try_git_hash() -> Option<String> {
    use std::process::Command;

    let out = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8(out.stdout).ok()?;
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

pub fn read_manifest(path: impl AsRef<Path>) -> Result<RunManifestV1, NdjsonError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice::<RunManifestV1>(&bytes)?)
}

pub fn write_manifest_atomic(path: impl AsRef<Path>, m: &RunManifestV1) -> Result<(), NdjsonError> {
    let path = path.as_ref();
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(m)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write bytes to `path` through a sibling temp file.
pub fn write_bytes_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[derive(Debug, Error)]
pub enum NdjsonError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append. Creates it if it doesn't exist.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines=0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level` when set. Returns an error if a subscriber is
/// already installed (tests and embedding binaries may install their own).
pub fn init_tracing(level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use serde_json::Value;

    fn read_ndjson_lenient(path: &Path) -> Vec<Value> {
        let s = fs::read_to_string(path).expect("read");
        let mut out = Vec::new();
        for line in s.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(v) = serde_json::from_str::<Value>(line) {
                out.push(v);
            }
        }
        out
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn writes_one_valid_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut w = NdjsonWriter::open_append(&path).unwrap();

        #[derive(Serialize)]
        struct E {
            event: &'static str,
            x: u32,
        }

        w.write_event(&E { event: "e", x: 1 }).unwrap();
        w.write_event(&E { event: "e", x: 2 }).unwrap();
        w.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0]["x"], 1);
        assert_eq!(vals[1]["x"], 2);
    }

    #[test]
    fn reopen_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.ndjson");
        for i in 0..3u32 {
            let mut w = NdjsonWriter::open_append_with_flush(&path, 1).unwrap();
            w.write_event(&serde_json::json!({ "event": "tick", "i": i }))
                .unwrap();
        }
        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 3);
        assert_eq!(vals[2]["i"], 2);
    }

    #[test]
    fn manifest_write_is_atomic_wrt_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let run_json = dir.path().join("run.json");

        let mut m = RunManifestV1 {
            run_manifest_version: RUN_MANIFEST_VERSION,
            run_id: "r".to_string(),
            created_ts_ms: now_ms(),
            feature_schema_id: 1,
            action_space_a: 8,
            ruleset_id: RULESET_ID.to_string(),
            config_hash: Some("abc".to_string()),
            replay_dir: "replay".to_string(),
            logs_dir: "logs".to_string(),
            models_dir: "models".to_string(),
            ..RunManifestV1::default()
        };
        write_manifest_atomic(&run_json, &m).unwrap();

        // Simulate crash leaving a corrupt tmp file around; run.json must remain readable.
        let tmp = run_json.with_extension("json.tmp");
        fs::write(&tmp, b"{not valid json").unwrap();

        let got = read_manifest(&run_json).unwrap();
        assert_eq!(got.run_id, "r");

        m.selfplay_games_completed = 7;
        m.checkpoint_version = 3;
        write_manifest_atomic(&run_json, &m).unwrap();
        let got2 = read_manifest(&run_json).unwrap();
        assert_eq!(got2.selfplay_games_completed, 7);
        assert_eq!(got2.checkpoint_version, 3);
    }

    #[test]
    fn manifest_reads_older_files_without_new_fields() {
        let dir = tempfile::tempdir().unwrap();
        let run_json = dir.path().join("run.json");
        let minimal = serde_json::json!({
            "run_manifest_version": 1,
            "run_id": "old",
            "created_ts_ms": 1,
            "feature_schema_id": 1,
            "action_space_a": 8,
            "ruleset_id": RULESET_ID,
            "git_hash": null,
            "config_hash": null,
            "replay_dir": "replay",
            "logs_dir": "logs",
            "models_dir": "models"
        });
        fs::write(&run_json, serde_json::to_vec(&minimal).unwrap()).unwrap();
        let m = read_manifest(&run_json).unwrap();
        assert_eq!(m.train_step, 0);
        assert_eq!(m.promotions, 0);
        assert!(m.gate_win_rate.is_none());
    }

    #[test]
    fn config_hash_is_stable_hex() {
        let a = hash_config_bytes(b"training:\n  batch_size: 8\n");
        let b = hash_config_bytes(b"training:\n  batch_size: 8\n");
        let c = hash_config_bytes(b"training:\n  batch_size: 9\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn atomic_bytes_write_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("config.yaml");
        write_bytes_atomic(&p, b"a: 1\n").unwrap();
        assert_eq!(fs::read(&p).unwrap(), b"a: 1\n");
        assert!(!dir.path().join("config.yaml.tmp").exists());
    }
}
