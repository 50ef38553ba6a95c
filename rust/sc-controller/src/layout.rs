//! Run directory layout, manifest and config snapshot.

use std::path::{Path, PathBuf};

use sc_core::features::FEATURE_SCHEMA_ID;
use sc_core::{Config, A};
use sc_logging::RunManifestV1;

use crate::{ControllerError, Phase};

pub const RUN_JSON: &str = "run.json";
pub const CONFIG_SNAPSHOT: &str = "config.yaml";
pub const METRICS_FILE: &str = "metrics.ndjson";

#[derive(Debug, Clone)]
pub struct RunLayout {
    pub run_dir: PathBuf,
}

impl RunLayout {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_json(&self) -> PathBuf {
        self.run_dir.join(RUN_JSON)
    }

    pub fn config_snapshot(&self) -> PathBuf {
        self.run_dir.join(CONFIG_SNAPSHOT)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.run_dir.join("logs")
    }

    pub fn metrics(&self) -> PathBuf {
        self.logs_dir().join(METRICS_FILE)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.run_dir.join("models")
    }

    pub fn replay_dir(&self) -> PathBuf {
        self.run_dir.join("replay")
    }

    pub fn ensure(&self) -> Result<(), ControllerError> {
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.models_dir())?;
        std::fs::create_dir_all(self.replay_dir())?;
        Ok(())
    }

    /// The run's own config, when one was snapshotted.
    pub fn load_config(&self) -> Result<Option<Config>, ControllerError> {
        let p = self.config_snapshot();
        if !p.exists() {
            return Ok(None);
        }
        Ok(Some(Config::load(&p)?))
    }

    pub fn read_manifest(&self) -> Result<RunManifestV1, ControllerError> {
        let p = self.run_json();
        if !p.exists() {
            return Err(ControllerError::MissingManifest(p));
        }
        Ok(sc_logging::read_manifest(&p)?)
    }

    pub fn update_manifest(
        &self,
        f: impl FnOnce(&mut RunManifestV1),
    ) -> Result<(), ControllerError> {
        let mut m = self.read_manifest()?;
        f(&mut m);
        sc_logging::write_manifest_atomic(self.run_json(), &m)?;
        Ok(())
    }
}

/// Write `config.yaml` atomically and return its blake3 hash.
pub fn write_config_snapshot(layout: &RunLayout, cfg: &Config) -> Result<String, ControllerError> {
    let yaml = cfg.to_yaml()?;
    sc_logging::write_bytes_atomic(layout.config_snapshot(), yaml.as_bytes())?;
    Ok(sc_logging::hash_config_bytes(yaml.as_bytes()))
}

/// Snapshot `cfg` when the run has no `config.yaml` yet. An existing snapshot
/// is left as written. Returns the hash of the snapshot on disk.
pub fn ensure_config_snapshot(layout: &RunLayout, cfg: &Config) -> Result<String, ControllerError> {
    match std::fs::read(layout.config_snapshot()) {
        Ok(bytes) => Ok(sc_logging::hash_config_bytes(&bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => write_config_snapshot(layout, cfg),
        Err(e) => Err(e.into()),
    }
}

fn run_id(run_dir: &Path) -> String {
    run_dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("run")
        .to_string()
}

/// Create `run.json` on first use, recording `config_hash`. An existing
/// manifest is returned unchanged.
pub fn ensure_manifest(
    layout: &RunLayout,
    config_hash: &str,
) -> Result<RunManifestV1, ControllerError> {
    layout.ensure()?;
    let run_json = layout.run_json();
    if run_json.exists() {
        return Ok(sc_logging::read_manifest(&run_json)?);
    }
    let m = RunManifestV1 {
        run_manifest_version: sc_logging::RUN_MANIFEST_VERSION,
        run_id: run_id(&layout.run_dir),
        created_ts_ms: sc_logging::now_ms(),
        feature_schema_id: FEATURE_SCHEMA_ID,
        action_space_a: A as u32,
        ruleset_id: sc_logging::RULESET_ID.to_string(),
        git_hash: sc_logging::try_git_hash(),
        replay_dir: "replay".to_string(),
        logs_dir: "logs".to_string(),
        models_dir: "models".to_string(),
        controller_phase: Some(Phase::Idle.as_str().to_string()),
        controller_status: Some("initialized".to_string()),
        controller_last_ts_ms: Some(sc_logging::now_ms()),
        config_hash: Some(config_hash.to_string()),
        ..RunManifestV1::default()
    };
    sc_logging::write_manifest_atomic(&run_json, &m)?;
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_is_created_once_and_keeps_counters() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(tmp.path().join("r1"));
        let cfg = Config::default();
        // The snapshot needs the run dir.
        assert!(write_config_snapshot(&layout, &cfg).is_err());

        let m = ensure_manifest(&layout, "h1").unwrap();
        assert_eq!(m.run_id, "r1");
        assert_eq!(m.action_space_a, 8);
        layout.update_manifest(|m| m.train_step = 42).unwrap();

        let m = ensure_manifest(&layout, "h2").unwrap();
        assert_eq!(m.train_step, 42);
        assert_eq!(m.config_hash.as_deref(), Some("h1"));
        assert!(layout.replay_dir().is_dir() && layout.models_dir().is_dir());
    }

    #[test]
    fn config_snapshot_is_written_once() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(tmp.path().join("r1"));
        layout.ensure().unwrap();
        assert!(layout.load_config().unwrap().is_none());

        let mut cfg = Config::default();
        cfg.model.n_kernels = 4;
        let h = ensure_config_snapshot(&layout, &cfg).unwrap();
        let before = std::fs::read(layout.config_snapshot()).unwrap();

        let mut other = cfg.clone();
        other.model.n_kernels = 128;
        assert_eq!(ensure_config_snapshot(&layout, &other).unwrap(), h);
        assert_eq!(std::fs::read(layout.config_snapshot()).unwrap(), before);
        let back = layout.load_config().unwrap().unwrap();
        assert_eq!(back.to_yaml().unwrap(), cfg.to_yaml().unwrap());
    }
}
