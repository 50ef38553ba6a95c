//! Unified run configuration.
//!
//! One YAML file configures every stage of the pipeline. All fields have
//! defaults, so a config file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub mcts: MctsConfig,
    #[serde(default)]
    pub selfplay: SelfplayConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub gating: GatingConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Game rules settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GameConfig {
    /// Kicks after which the game is declared a draw.
    #[serde(default = "default_max_moves")]
    pub max_moves: u16,
}

fn default_max_moves() -> u16 {
    200
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_moves: default_max_moves(),
        }
    }
}

/// Network architecture settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Conv channels in the trunk.
    #[serde(default = "default_n_kernels")]
    pub n_kernels: usize,
    /// Residual blocks in the trunk.
    #[serde(default = "default_residual_blocks")]
    pub residual_blocks: usize,
    /// L2 penalty factor on every weight tensor.
    #[serde(default = "default_reg_fact")]
    pub reg_fact: f64,
    /// "cpu" or "cuda".
    #[serde(default = "default_device")]
    pub device: String,
    /// Seed for parameter initialisation.
    #[serde(default)]
    pub seed: u64,
}

fn default_n_kernels() -> usize {
    128
}

fn default_residual_blocks() -> usize {
    10
}

fn default_reg_fact() -> f64 {
    1e-3
}

fn default_device() -> String {
    "cpu".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_kernels: default_n_kernels(),
            residual_blocks: default_residual_blocks(),
            reg_fact: default_reg_fact(),
            device: default_device(),
            seed: 0,
        }
    }
}

/// Inference server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferenceConfig {
    /// Largest batch of contiguous same-slot requests per forward pass (1 disables batching).
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_max_batch() -> usize {
    32
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
        }
    }
}

/// MCTS algorithm configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MctsConfig {
    /// Simulations per move.
    #[serde(default = "default_n_rollouts")]
    pub n_rollouts: u32,
    /// PUCT exploration constant.
    #[serde(default = "default_c_puct")]
    pub c_puct: f32,
    /// Dirichlet noise alpha (only used in self-play, not gating).
    #[serde(default = "default_dirichlet_alpha")]
    pub dirichlet_alpha: f32,
    /// Dirichlet noise epsilon - fraction of noise to mix in (only used in self-play).
    #[serde(default = "default_dirichlet_epsilon")]
    pub dirichlet_epsilon: f32,
}

fn default_n_rollouts() -> u32 {
    100
}

fn default_c_puct() -> f32 {
    1.0
}

fn default_dirichlet_alpha() -> f32 {
    0.3
}

fn default_dirichlet_epsilon() -> f32 {
    0.25
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            n_rollouts: default_n_rollouts(),
            c_puct: default_c_puct(),
            dirichlet_alpha: default_dirichlet_alpha(),
            dirichlet_epsilon: default_dirichlet_epsilon(),
        }
    }
}

/// Self-play configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelfplayConfig {
    /// Games per self-play round.
    #[serde(default = "default_n_self_play_games")]
    pub n_self_play_games: u32,
    /// Worker threads playing games concurrently.
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Executed-move temperature for the opening.
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f32,
    /// Per-kick geometric decay applied after the opening.
    #[serde(default = "default_temperature_decay_factor")]
    pub temperature_decay_factor: f32,
    /// Kicks played at `initial_temperature` before decay starts.
    #[serde(default = "default_moves_before_decaying")]
    pub moves_before_decaying: u32,
    /// Skip the first self-play round of a process and train on persisted replay.
    #[serde(default)]
    pub skip_first_self_play: bool,
    /// Play twice the usual number of games in the first round.
    #[serde(default = "default_true")]
    pub double_first_self_play: bool,
    /// Attempts per game after an inference failure before the game is abandoned.
    #[serde(default = "default_max_game_retries")]
    pub max_game_retries: u32,
    /// Base seed for per-game RNG streams.
    #[serde(default)]
    pub seed: u64,
}

fn default_n_self_play_games() -> u32 {
    256
}

fn default_workers() -> u32 {
    8
}

fn default_initial_temperature() -> f32 {
    1.0
}

fn default_temperature_decay_factor() -> f32 {
    0.95
}

fn default_moves_before_decaying() -> u32 {
    10
}

fn default_max_game_retries() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for SelfplayConfig {
    fn default() -> Self {
        Self {
            n_self_play_games: default_n_self_play_games(),
            workers: default_workers(),
            initial_temperature: default_initial_temperature(),
            temperature_decay_factor: default_temperature_decay_factor(),
            moves_before_decaying: default_moves_before_decaying(),
            skip_first_self_play: false,
            double_first_self_play: true,
            max_game_retries: default_max_game_retries(),
            seed: 0,
        }
    }
}

/// Named learning-rate decay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LrScheduleKind {
    Constant,
    Linear,
    Staircase,
    MiddleDrop,
    DoubleLinearCon,
    DoubleMiddleDrop,
}

/// Training configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    /// Samples per optimizer step.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Optimizer steps per training round.
    #[serde(default = "default_n_training_steps")]
    pub n_training_steps: u32,
    /// Weight of the value loss in the total loss.
    #[serde(default = "default_vf_coef")]
    pub vf_coef: f64,
    /// Learning rate at step 0.
    #[serde(default = "default_initial_lr")]
    pub initial_lr: f64,
    #[serde(default = "default_lrschedule")]
    pub lrschedule: LrScheduleKind,
    /// Multiplier applied at every staircase boundary.
    #[serde(default = "default_lr_decay_factor")]
    pub lr_decay_factor: f64,
    /// Staircase step width. None means a quarter of the training horizon.
    #[serde(default)]
    pub lr_decay_steps: Option<u64>,
    /// Momentum coefficient.
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    /// Global L2 norm bound for gradients.
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,
    /// Emit a train_step event every N steps.
    #[serde(default = "default_log_every")]
    pub log_every: u32,
    /// Seed for mini-batch sampling.
    #[serde(default)]
    pub seed: u64,
}

fn default_batch_size() -> u32 {
    512
}

fn default_n_training_steps() -> u32 {
    1024
}

fn default_vf_coef() -> f64 {
    1.0
}

fn default_initial_lr() -> f64 {
    1e-2
}

fn default_lrschedule() -> LrScheduleKind {
    LrScheduleKind::Staircase
}

fn default_lr_decay_factor() -> f64 {
    0.1
}

fn default_momentum() -> f64 {
    0.9
}

fn default_max_grad_norm() -> f64 {
    0.5
}

fn default_log_every() -> u32 {
    64
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            n_training_steps: default_n_training_steps(),
            vf_coef: default_vf_coef(),
            initial_lr: default_initial_lr(),
            lrschedule: default_lrschedule(),
            lr_decay_factor: default_lr_decay_factor(),
            lr_decay_steps: None,
            momentum: default_momentum(),
            max_grad_norm: default_max_grad_norm(),
            log_every: default_log_every(),
            seed: 0,
        }
    }
}

/// Replay shard settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayConfig {
    /// Games per sealed shard.
    #[serde(default = "default_n_games_in_replay_checkpoint")]
    pub n_games_in_replay_checkpoint: u32,
    /// Shards retained on disk; the oldest are deleted beyond this.
    #[serde(default = "default_n_replays")]
    pub n_replays: u32,
    /// Extra attempts for a failed shard write.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    /// Decoded shards kept in memory by the sampler.
    #[serde(default = "default_max_cached_shards")]
    pub max_cached_shards: usize,
}

fn default_n_games_in_replay_checkpoint() -> u32 {
    128
}

fn default_n_replays() -> u32 {
    1024
}

fn default_write_retries() -> u32 {
    3
}

fn default_max_cached_shards() -> usize {
    64
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            n_games_in_replay_checkpoint: default_n_games_in_replay_checkpoint(),
            n_replays: default_n_replays(),
            write_retries: default_write_retries(),
            max_cached_shards: default_max_cached_shards(),
        }
    }
}

/// Gating (model evaluation) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatingConfig {
    /// Games per gate.
    #[serde(default = "default_n_evaluation_games")]
    pub n_evaluation_games: u32,
    /// Gates per full run.
    #[serde(default = "default_n_evaluations")]
    pub n_evaluations: u32,
    /// Executed-move temperature for the opening of gate games.
    #[serde(default = "default_evaluation_temperature")]
    pub evaluation_temperature: f32,
    /// Win rate (draws count half) needed for promotion.
    #[serde(default = "default_new_best_model_threshold")]
    pub new_best_model_threshold: f64,
    /// Base seed for the paired gating schedule.
    #[serde(default)]
    pub seed: u64,
}

fn default_n_evaluation_games() -> u32 {
    100
}

fn default_n_evaluations() -> u32 {
    10
}

fn default_evaluation_temperature() -> f32 {
    1.0
}

fn default_new_best_model_threshold() -> f64 {
    0.55
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            n_evaluation_games: default_n_evaluation_games(),
            n_evaluations: default_n_evaluations(),
            evaluation_temperature: default_evaluation_temperature(),
            new_best_model_threshold: default_new_best_model_threshold(),
            seed: 0,
        }
    }
}

/// How the controller treats existing checkpoints at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Resume if a checkpoint pointer exists, else start fresh.
    #[default]
    Auto,
    /// Start at version 1; refuse if a checkpoint pointer exists.
    Fresh,
    /// Require a loadable checkpoint.
    Resume,
}

/// Iteration controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Self-play/train iterations in a full run.
    #[serde(default = "default_n_total_timesteps")]
    pub n_total_timesteps: u32,
    /// Checkpoint directories retained under models/.
    #[serde(default = "default_keep_checkpoints")]
    pub keep_checkpoints: u32,
    #[serde(default)]
    pub start_mode: StartMode,
}

fn default_n_total_timesteps() -> u32 {
    500
}

fn default_keep_checkpoints() -> u32 {
    5
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            n_total_timesteps: default_n_total_timesteps(),
            keep_checkpoints: default_keep_checkpoints(),
            start_mode: StartMode::Auto,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Total optimizer steps of a full run; the horizon of the LR schedule.
    pub fn training_horizon(&self) -> u64 {
        self.controller.n_total_timesteps as u64 * self.training.n_training_steps as u64
    }

    /// Reject values no stage can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn bad(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.into()))
        }
        if self.game.max_moves == 0 {
            return bad("game.max_moves must be > 0");
        }
        if self.model.n_kernels == 0 {
            return bad("model.n_kernels must be > 0");
        }
        if !(self.model.reg_fact.is_finite() && self.model.reg_fact >= 0.0) {
            return bad("model.reg_fact must be finite and >= 0");
        }
        if !matches!(self.model.device.as_str(), "cpu" | "cuda") {
            return bad(format!(
                "model.device must be cpu or cuda (got {})",
                self.model.device
            ));
        }
        if self.inference.max_batch == 0 {
            return bad("inference.max_batch must be > 0");
        }
        if self.mcts.n_rollouts == 0 {
            return bad("mcts.n_rollouts must be > 0");
        }
        if !(self.mcts.c_puct.is_finite() && self.mcts.c_puct > 0.0) {
            return bad("mcts.c_puct must be finite and > 0");
        }
        if !(0.0..=1.0).contains(&self.mcts.dirichlet_epsilon) {
            return bad("mcts.dirichlet_epsilon must be in [0, 1]");
        }
        if self.mcts.dirichlet_epsilon > 0.0 && !(self.mcts.dirichlet_alpha > 0.0) {
            return bad("mcts.dirichlet_alpha must be > 0 when noise is enabled");
        }
        let sp = &self.selfplay;
        if sp.workers == 0 {
            return bad("selfplay.workers must be > 0");
        }
        if !(sp.initial_temperature >= 0.0) {
            return bad("selfplay.initial_temperature must be >= 0");
        }
        if !(sp.temperature_decay_factor > 0.0 && sp.temperature_decay_factor <= 1.0) {
            return bad("selfplay.temperature_decay_factor must be in (0, 1]");
        }
        if sp.skip_first_self_play && sp.double_first_self_play {
            return bad("selfplay.skip_first_self_play and double_first_self_play are exclusive");
        }
        let t = &self.training;
        if t.batch_size == 0 {
            return bad("training.batch_size must be > 0");
        }
        if !(t.initial_lr.is_finite() && t.initial_lr > 0.0) {
            return bad("training.initial_lr must be finite and > 0");
        }
        if !(t.lr_decay_factor > 0.0 && t.lr_decay_factor <= 1.0) {
            return bad("training.lr_decay_factor must be in (0, 1]");
        }
        if t.lr_decay_steps == Some(0) {
            return bad("training.lr_decay_steps must be > 0");
        }
        if !(0.0..1.0).contains(&t.momentum) {
            return bad("training.momentum must be in [0, 1)");
        }
        if !(t.max_grad_norm.is_finite() && t.max_grad_norm > 0.0) {
            return bad("training.max_grad_norm must be finite and > 0");
        }
        if !(t.vf_coef.is_finite() && t.vf_coef >= 0.0) {
            return bad("training.vf_coef must be finite and >= 0");
        }
        if self.replay.n_games_in_replay_checkpoint == 0 {
            return bad("replay.n_games_in_replay_checkpoint must be > 0");
        }
        if self.replay.n_replays == 0 {
            return bad("replay.n_replays must be > 0");
        }
        if self.replay.max_cached_shards == 0 {
            return bad("replay.max_cached_shards must be > 0");
        }
        let g = &self.gating;
        if !(g.evaluation_temperature >= 0.0) {
            return bad("gating.evaluation_temperature must be >= 0");
        }
        if !(0.0..=1.0).contains(&g.new_best_model_threshold) {
            return bad("gating.new_best_model_threshold must be in [0, 1]");
        }
        if g.n_evaluations > 0 && g.n_evaluation_games == 0 {
            return bad("gating.n_evaluation_games must be > 0 when gating is enabled");
        }
        if self.controller.keep_checkpoints == 0 {
            return bad("controller.keep_checkpoints must be > 0");
        }
        Ok(())
    }
}
