//! NDJSON event payloads written to `logs/metrics.ndjson`.

use serde::Serialize;

/// Minimal log schema versioning fields.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfoV1 {
    pub feature_schema_id: u32,
    pub action_space_a: u32,
    pub ruleset_id: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InferStatsV1 {
    pub requests: u64,
    pub batches: u64,
    pub errors: u64,
    pub max_batch: u64,
    pub mean_batch: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfplayRoundEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub v: VersionInfoV1,

    pub iteration: u64,
    pub games_requested: u32,
    pub games_completed: u32,
    pub games_aborted: u32,
    pub samples: u64,
    pub shards_sealed: u32,
    /// Games waiting in the unsealed replay shard after the round.
    pub replay_open_games: u64,
    pub p0_wins: u32,
    pub p1_wins: u32,
    pub draws: u32,
    pub mean_game_len: f64,
    pub wall_ms: u64,
    pub infer: InferStatsV1,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainStepEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,

    pub iteration: u64,
    pub step: u64,
    pub lr: f64,
    pub total_loss: f64,
    pub policy_loss: f64,
    pub value_loss: f64,
    pub reg_loss: f64,
    pub grad_norm: f64,
    pub clipped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,

    pub iteration: u64,
    pub version: u64,
    pub step: u64,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,

    pub iteration: u64,
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub win_rate: f64,
    pub threshold: f64,
    pub decision: &'static str,
    pub seeds_hash: String,
    pub wall_ms: u64,
}
