use std::path::Path;

use candle_core::{DType, Device, Tensor, D};
use sc_core::features::FEATURE_SCHEMA_ID;
use sc_core::{Config, A, F};
use sc_infer::{BoxError, Evaluation, Evaluator, ModelSlot};
use sc_nn::pair::{BEST_FILE, TRAINING_FILE};
use sc_nn::{select_device, CheckpointError, CheckpointMeta, CheckpointStore, NetConfig, NetworkPair};
use sc_replay::Batch;
use thiserror::Error;
use tracing::{debug, info};

use crate::clip::clip_grad_store;
use crate::optimizer::MomentumSgd;
use crate::scheduler::LrSchedule;

pub const OPTIMIZER_FILE: &str = "optimizer.safetensors";

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("non-finite loss {loss} at step {step}")]
    NonFiniteLoss { step: u64, loss: f32 },
    #[error("non-finite gradient norm {norm} at step {step}")]
    NonFiniteGradient { step: u64, norm: f64 },
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    #[error("checkpoint architecture {got:?} does not match the configured {expected:?}")]
    ArchitectureMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

#[derive(Debug, Clone)]
pub struct LearnerConfig {
    pub net: NetConfig,
    pub device: String,
    pub seed: u64,
    pub reg_fact: f64,
    pub vf_coef: f64,
    pub momentum: f64,
    pub max_grad_norm: f64,
    pub schedule: LrSchedule,
}

impl LearnerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            net: NetConfig::from(&cfg.model),
            device: cfg.model.device.clone(),
            seed: cfg.model.seed,
            reg_fact: cfg.model.reg_fact,
            vf_coef: cfg.training.vf_coef,
            momentum: cfg.training.momentum,
            max_grad_norm: cfg.training.max_grad_norm,
            schedule: LrSchedule::from_config(cfg),
        }
    }
}

/// Loss terms and bookkeeping for one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    /// Step counter after this step.
    pub step: u64,
    pub lr: f64,
    pub total_loss: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub reg_loss: f32,
    /// Global gradient norm before clipping.
    pub grad_norm: f64,
}

pub struct Learner {
    cfg: LearnerConfig,
    pair: NetworkPair,
    opt: MomentumSgd,
    step: u64,
}

impl Learner {
    pub fn new(cfg: LearnerConfig) -> Result<Self, TrainError> {
        let device = select_device(&cfg.device)?;
        let pair = NetworkPair::new(cfg.net, device, cfg.seed)?;
        let vars = pair
            .training_vars()
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("varmap lock poisoned".to_string()))?
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        let opt = MomentumSgd::new(vars, cfg.momentum);
        Ok(Self {
            cfg,
            pair,
            opt,
            step: 0,
        })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn pair(&self) -> &NetworkPair {
        &self.pair
    }

    pub fn optimizer(&self) -> &MomentumSgd {
        &self.opt
    }

    pub fn current_lr(&self) -> f64 {
        self.cfg.schedule.value_at(self.step)
    }

    fn device(&self) -> &Device {
        self.pair.device()
    }

    /// One optimizer step on "training". A non-finite loss or gradient norm
    /// fails before any parameter or momentum buffer is touched.
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepMetrics, TrainError> {
        let n = batch.len();
        if n == 0 || batch.features.len() != n * F || batch.pi.len() != n * A {
            return Err(TrainError::InvalidBatch(format!(
                "len={n} features={} pi={}",
                batch.features.len(),
                batch.pi.len()
            )));
        }
        let x = Tensor::from_slice(&batch.features, (n, F), self.device())?;
        let pi = Tensor::from_slice(&batch.pi, (n, A), self.device())?;
        let z = Tensor::from_slice(&batch.z, n, self.device())?;

        let net = self.pair.net(ModelSlot::Training);
        let (logits, value) = net.forward(&x)?;

        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let policy_loss = (&pi * &log_probs)?.sum(D::Minus1)?.neg()?.mean_all()?;
        let value_loss = (&value - &z)?.sqr()?.mean_all()?;
        let reg_loss = (net.l2_penalty()? * self.cfg.reg_fact)?;
        let total = ((&policy_loss + (&value_loss * self.cfg.vf_coef)?)? + &reg_loss)?;

        let total_val = total.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        if !total_val.is_finite() {
            return Err(TrainError::NonFiniteLoss {
                step: self.step,
                loss: total_val,
            });
        }

        let vars = self.opt.vars();
        let mut grads = total.backward()?;
        let grad_norm = clip_grad_store(&mut grads, &vars, self.cfg.max_grad_norm)?;
        if !grad_norm.is_finite() {
            return Err(TrainError::NonFiniteGradient {
                step: self.step,
                norm: grad_norm,
            });
        }
        let lr = self.cfg.schedule.value_at(self.step);
        self.opt.step(&grads, lr)?;
        self.step += 1;

        let metrics = StepMetrics {
            step: self.step,
            lr,
            total_loss: total_val,
            policy_loss: policy_loss.to_scalar::<f32>()?,
            value_loss: value_loss.to_scalar::<f32>()?,
            reg_loss: reg_loss.to_scalar::<f32>()?,
            grad_norm,
        };
        debug!(
            step = metrics.step,
            loss = metrics.total_loss,
            lr = metrics.lr,
            "train step"
        );
        Ok(metrics)
    }

    /// Copy "training" onto "best".
    pub fn promote(&mut self) -> Result<(), TrainError> {
        self.pair.promote()?;
        info!(step = self.step, "training parameters promoted to best");
        Ok(())
    }

    /// Persist both parameter sets and the momentum buffers as checkpoint `version`.
    pub fn save_checkpoint(
        &self,
        store: &CheckpointStore,
        version: u64,
        iteration: u64,
        promotions: u64,
        config_hash: Option<String>,
    ) -> Result<CheckpointMeta, TrainError> {
        let meta = CheckpointMeta {
            version,
            step: self.step,
            iteration,
            created_ts_ms: sc_logging::now_ms(),
            feature_schema_id: FEATURE_SCHEMA_ID,
            ruleset_id: sc_logging::RULESET_ID.to_string(),
            n_kernels: self.cfg.net.n_kernels,
            residual_blocks: self.cfg.net.residual_blocks,
            files: vec![
                TRAINING_FILE.to_string(),
                BEST_FILE.to_string(),
                OPTIMIZER_FILE.to_string(),
            ],
            promotions,
            config_hash,
            git_hash: sc_logging::try_git_hash(),
        };
        store.commit(&meta, |dir| {
            self.pair.save(dir)?;
            self.opt.save(&dir.join(OPTIMIZER_FILE))?;
            Ok(())
        })?;
        Ok(meta)
    }

    /// Load the checkpoint `latest.json` points at, if any, and resume its step.
    pub fn restore_latest(
        &mut self,
        store: &CheckpointStore,
    ) -> Result<Option<CheckpointMeta>, TrainError> {
        let Some((meta, dir)) = store.resolve_latest()? else {
            return Ok(None);
        };
        self.restore_from(&meta, &dir)?;
        Ok(Some(meta))
    }

    pub fn restore_from(&mut self, meta: &CheckpointMeta, dir: &Path) -> Result<(), TrainError> {
        let expected = (self.cfg.net.n_kernels, self.cfg.net.residual_blocks);
        let got = (meta.n_kernels, meta.residual_blocks);
        if expected != got {
            return Err(TrainError::ArchitectureMismatch { expected, got });
        }
        self.pair.load(dir)?;
        let device = self.device().clone();
        self.opt.load(&dir.join(OPTIMIZER_FILE), &device)?;
        self.step = meta.step;
        info!(
            version = meta.version,
            step = meta.step,
            iteration = meta.iteration,
            "checkpoint restored"
        );
        Ok(())
    }
}

impl Evaluator for Learner {
    fn evaluate_batch(
        &mut self,
        slot: ModelSlot,
        inputs: &[&[f32]],
    ) -> Result<Vec<Evaluation>, BoxError> {
        Ok(self.pair.evaluate(slot, inputs)?)
    }
}
