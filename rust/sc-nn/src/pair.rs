//! The two named parameter sets: "training" and "best".

use std::path::Path;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use sc_core::F;
use sc_infer::{BoxError, Evaluation, Evaluator, ModelSlot};

use crate::net::{reinit_seeded, NetConfig, PolicyValueNet};

pub const TRAINING_FILE: &str = "training.safetensors";
pub const BEST_FILE: &str = "best.safetensors";

fn lock_err() -> candle_core::Error {
    candle_core::Error::Msg("varmap lock poisoned".to_string())
}

/// Same architecture twice. Only the trainer writes "training"; only promotion
/// writes "best". Both live on the evaluation thread.
pub struct NetworkPair {
    device: Device,
    cfg: NetConfig,
    training_vars: VarMap,
    training: PolicyValueNet,
    best_vars: VarMap,
    best: PolicyValueNet,
}

impl NetworkPair {
    /// Fresh pair; "best" starts as a copy of "training".
    pub fn new(cfg: NetConfig, device: Device, seed: u64) -> Result<Self> {
        let training_vars = VarMap::new();
        let training = PolicyValueNet::new(
            cfg,
            VarBuilder::from_varmap(&training_vars, DType::F32, &device),
        )?;
        reinit_seeded(&training_vars, seed)?;

        let best_vars = VarMap::new();
        let best = PolicyValueNet::new(
            cfg,
            VarBuilder::from_varmap(&best_vars, DType::F32, &device),
        )?;
        let pair = Self {
            device,
            cfg,
            training_vars,
            training,
            best_vars,
            best,
        };
        pair.promote()?;
        Ok(pair)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> NetConfig {
        self.cfg
    }

    pub fn net(&self, slot: ModelSlot) -> &PolicyValueNet {
        match slot {
            ModelSlot::Best => &self.best,
            ModelSlot::Training => &self.training,
        }
    }

    pub fn training_vars(&self) -> &VarMap {
        &self.training_vars
    }

    /// Copy every "training" parameter onto "best".
    pub fn promote(&self) -> Result<()> {
        let src = self.training_vars.data().lock().map_err(|_| lock_err())?;
        let dst = self.best_vars.data().lock().map_err(|_| lock_err())?;
        if src.len() != dst.len() {
            return Err(candle_core::Error::Msg(format!(
                "parameter sets differ: training has {}, best has {}",
                src.len(),
                dst.len()
            )));
        }
        for (name, var) in src.iter() {
            let Some(target) = dst.get(name) else {
                return Err(candle_core::Error::Msg(format!("best lacks parameter {name}")));
            };
            target.set(var.as_tensor())?;
        }
        Ok(())
    }

    /// True when every parameter of "best" equals its "training" counterpart.
    pub fn slots_equal(&self) -> Result<bool> {
        let src = self.training_vars.data().lock().map_err(|_| lock_err())?;
        let dst = self.best_vars.data().lock().map_err(|_| lock_err())?;
        if src.len() != dst.len() {
            return Ok(false);
        }
        for (name, var) in src.iter() {
            let Some(other) = dst.get(name) else {
                return Ok(false);
            };
            let diff = (var.as_tensor() - other.as_tensor())?
                .abs()?
                .max_all()?
                .to_scalar::<f32>()?;
            if diff != 0.0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Stack encoded states into a `[B, F]` tensor.
    pub fn inputs_to_tensor(&self, inputs: &[&[f32]]) -> Result<Tensor> {
        let mut flat = Vec::with_capacity(inputs.len() * F);
        for x in inputs {
            if x.len() != F {
                return Err(candle_core::Error::Msg(format!(
                    "input has {} features, expected {F}",
                    x.len()
                )));
            }
            flat.extend_from_slice(x);
        }
        Tensor::from_vec(flat, (inputs.len(), F), &self.device)
    }

    pub fn evaluate(&self, slot: ModelSlot, inputs: &[&[f32]]) -> Result<Vec<Evaluation>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let x = self.inputs_to_tensor(inputs)?;
        let (logits, value) = self.net(slot).forward(&x)?;
        let logits = logits.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let value = value.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        Ok(logits
            .into_iter()
            .zip(value)
            .map(|(policy_logits, value)| Evaluation {
                policy_logits,
                value,
            })
            .collect())
    }

    /// Write both parameter sets into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.training_vars.save(dir.join(TRAINING_FILE))?;
        self.best_vars.save(dir.join(BEST_FILE))
    }

    /// Restore both parameter sets from `dir`; every parameter must be present.
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        self.training_vars.load(dir.join(TRAINING_FILE))?;
        self.best_vars.load(dir.join(BEST_FILE))
    }
}

impl Evaluator for NetworkPair {
    fn evaluate_batch(
        &mut self,
        slot: ModelSlot,
        inputs: &[&[f32]],
    ) -> std::result::Result<Vec<Evaluation>, BoxError> {
        Ok(self.evaluate(slot, inputs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_core::{encode_state, initial_state, A, NUM_CHANNELS};

    fn pair(seed: u64) -> NetworkPair {
        let cfg = NetConfig {
            in_channels: NUM_CHANNELS,
            n_kernels: 4,
            residual_blocks: 1,
        };
        NetworkPair::new(cfg, Device::Cpu, seed).unwrap()
    }

    fn perturb_training(p: &NetworkPair) {
        let data = p.training_vars().data().lock().unwrap();
        for var in data.values() {
            let bumped = (var.as_tensor() + 0.25).unwrap();
            var.set(&bumped).unwrap();
        }
    }

    #[test]
    fn fresh_pair_starts_equal() {
        let p = pair(0);
        assert!(p.slots_equal().unwrap());
    }

    #[test]
    fn promote_copies_training_onto_best() {
        let p = pair(1);
        let x = encode_state(&initial_state(200));
        let before = p.evaluate(ModelSlot::Best, &[&x]).unwrap();

        perturb_training(&p);
        assert!(!p.slots_equal().unwrap());
        let trained = p.evaluate(ModelSlot::Training, &[&x]).unwrap();
        assert_eq!(p.evaluate(ModelSlot::Best, &[&x]).unwrap(), before);
        assert_ne!(trained, before);

        p.promote().unwrap();
        assert!(p.slots_equal().unwrap());
        assert_eq!(p.evaluate(ModelSlot::Best, &[&x]).unwrap(), trained);
    }

    #[test]
    fn evaluate_returns_one_output_per_input() {
        let mut p = pair(2);
        let x = encode_state(&initial_state(200));
        let out = p.evaluate_batch(ModelSlot::Best, &[&x, &x, &x]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|e| e.policy_logits.len() == A));
        assert_eq!(out[0], out[2]);

        let short = vec![0.0f32; 3];
        assert!(p.evaluate_batch(ModelSlot::Best, &[&short]).is_err());
    }

    #[test]
    fn save_then_load_restores_both_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pair(3);
        perturb_training(&p);
        p.save(tmp.path()).unwrap();

        let mut q = pair(4);
        q.load(tmp.path()).unwrap();
        let x = encode_state(&initial_state(200));
        for slot in [ModelSlot::Best, ModelSlot::Training] {
            assert_eq!(
                q.evaluate(slot, &[&x]).unwrap(),
                p.evaluate(slot, &[&x]).unwrap()
            );
        }
        assert!(!q.slots_equal().unwrap());
    }
}
