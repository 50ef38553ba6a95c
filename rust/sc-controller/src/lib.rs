//! Run controller.
//!
//! Drives the `selfplay -> train -> gate -> checkpoint` cadence in one process:
//! the learner lives on the inference thread, self-play and gate workers talk
//! to it through the inference queue, and training, promotion and checkpoint IO
//! run there as exclusive jobs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub mod layout;
pub mod run;
pub mod startup;

pub use layout::{ensure_config_snapshot, ensure_manifest, write_config_snapshot, RunLayout};
pub use run::{gate_due, gate_every, gate_once, run, RunSummary};
pub use startup::{resolve_start, StartPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Selfplay,
    Train,
    Gate,
    Checkpoint,
    Done,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Selfplay => "selfplay",
            Phase::Train => "train",
            Phase::Gate => "gate",
            Phase::Checkpoint => "checkpoint",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("config: {0}")]
    Config(#[from] sc_core::ConfigError),
    #[error("missing run.json at {0}")]
    MissingManifest(PathBuf),
    #[error("io/json error: {0}")]
    Log(#[from] sc_logging::NdjsonError),
    #[error("io error: {0}")]
    Fs(#[from] std::io::Error),
    #[error("replay error: {0}")]
    Replay(#[from] sc_replay::ReplayError),
    #[error("self-play error: {0}")]
    Runtime(#[from] sc_runtime::RuntimeError),
    #[error("training error: {0}")]
    Train(#[from] sc_train::TrainError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] sc_nn::CheckpointError),
    #[error("gate error: {0}")]
    Gate(#[from] sc_eval::GateError),
    #[error("inference error: {0}")]
    Infer(#[from] sc_infer::InferError),
    #[error("inference server error: {0}")]
    Server(#[from] sc_infer::ServerError),
    #[error("replay directory {0} holds no sealed shard; cannot skip the first self-play round")]
    EmptyReplay(PathBuf),
    #[error("start_mode=fresh but a checkpoint pointer exists at {0}")]
    CheckpointExists(PathBuf),
    #[error("start_mode=resume but no checkpoint pointer exists under {0}")]
    NoCheckpoint(PathBuf),
    #[error("{dir} holds checkpoint versions {versions:?} but no latest.json")]
    DanglingCheckpoints { dir: PathBuf, versions: Vec<u64> },
    #[error("cancelled")]
    Cancelled,
}

/// Phase/status bookkeeping in `run.json` plus a shared cancel flag.
#[derive(Debug, Clone)]
pub struct IterationController {
    layout: RunLayout,
    cancel: Arc<AtomicBool>,
}

impl IterationController {
    pub fn new(layout: RunLayout) -> Self {
        Self {
            layout,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn set_phase(&self, phase: Phase, status: impl Into<String>) -> Result<(), ControllerError> {
        let status = status.into();
        tracing::info!(phase = phase.as_str(), "{status}");
        self.layout.update_manifest(|m| {
            m.controller_phase = Some(phase.as_str().to_string());
            m.controller_status = Some(status);
            m.controller_last_ts_ms = Some(sc_logging::now_ms());
            if phase != Phase::Error {
                m.controller_error = None;
            }
        })
    }

    pub fn set_error(&self, msg: impl Into<String>) -> Result<(), ControllerError> {
        let msg = msg.into();
        self.layout.update_manifest(|m| {
            m.controller_phase = Some(Phase::Error.as_str().to_string());
            m.controller_status = Some(msg.clone());
            m.controller_error = Some(msg);
            m.controller_last_ts_ms = Some(sc_logging::now_ms());
        })
    }
}
