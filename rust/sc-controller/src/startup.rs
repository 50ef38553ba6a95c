//! Checkpoint handling at process start.

use sc_core::StartMode;
use sc_nn::checkpoint::LATEST_FILE;
use sc_nn::CheckpointStore;
use sc_train::Learner;
use tracing::info;

use crate::ControllerError;

/// Where a run picks up. `version == 0` means nothing was restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartPoint {
    /// Last committed checkpoint version; the next save is `version + 1`.
    pub version: u64,
    /// Iterations completed before this process.
    pub iteration: u64,
    pub step: u64,
    pub promotions: u64,
    pub resumed: bool,
}

/// Apply `mode` against the checkpoint store, restoring `learner` when resuming.
///
/// A pointer whose files are missing or corrupt is fatal in every mode, and so
/// are checkpoint directories left without a pointer.
pub fn resolve_start(
    mode: StartMode,
    store: &CheckpointStore,
    learner: &mut Learner,
) -> Result<StartPoint, ControllerError> {
    if mode == StartMode::Fresh {
        if store.read_latest()?.is_some() {
            return Err(ControllerError::CheckpointExists(
                store.models_dir().join(LATEST_FILE),
            ));
        }
        // Version 1 would collide with a leftover directory at the first commit.
        let versions = store.list_versions()?;
        if !versions.is_empty() {
            return Err(ControllerError::DanglingCheckpoints {
                dir: store.models_dir().to_path_buf(),
                versions,
            });
        }
        info!("start_mode=fresh; starting at version 1");
        return Ok(StartPoint::default());
    }
    match learner.restore_latest(store)? {
        Some(meta) => Ok(StartPoint {
            version: meta.version,
            iteration: meta.iteration,
            step: meta.step,
            promotions: meta.promotions,
            resumed: true,
        }),
        None => {
            let versions = store.list_versions()?;
            if !versions.is_empty() {
                return Err(ControllerError::DanglingCheckpoints {
                    dir: store.models_dir().to_path_buf(),
                    versions,
                });
            }
            if mode == StartMode::Resume {
                return Err(ControllerError::NoCheckpoint(
                    store.models_dir().to_path_buf(),
                ));
            }
            info!(models_dir = %store.models_dir().display(), "no checkpoint found; starting fresh");
            Ok(StartPoint::default())
        }
    }
}
