//! Momentum SGD: `accum = momentum * accum + grad; w -= lr * accum`.

use std::collections::HashMap;
use std::path::Path;

use candle_core::backprop::GradStore;
use candle_core::{Device, Result, Tensor, Var};

/// Accumulators are keyed by parameter name so they survive a checkpoint round trip.
pub struct MomentumSgd {
    momentum: f64,
    vars: Vec<(String, Var)>,
    accum: HashMap<String, Tensor>,
}

impl MomentumSgd {
    /// `vars` is taken in name order.
    pub fn new(mut vars: Vec<(String, Var)>, momentum: f64) -> Self {
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            momentum,
            vars,
            accum: HashMap::new(),
        }
    }

    pub fn vars(&self) -> Vec<Var> {
        self.vars.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn step(&mut self, grads: &GradStore, lr: f64) -> Result<()> {
        for (name, var) in &self.vars {
            let Some(g) = grads.get(var.as_tensor()) else {
                continue;
            };
            let acc = match self.accum.get(name) {
                Some(prev) => ((prev * self.momentum)? + g)?,
                None => g.clone(),
            };
            var.set(&var.as_tensor().sub(&(&acc * lr)?)?)?;
            self.accum.insert(name.clone(), acc);
        }
        Ok(())
    }

    pub fn accumulator(&self, name: &str) -> Option<&Tensor> {
        self.accum.get(name)
    }

    /// Accumulators in parameter-name order.
    pub fn accumulators(&self) -> impl Iterator<Item = (&str, &Tensor)> + '_ {
        self.vars
            .iter()
            .filter_map(|(n, _)| self.accum.get(n).map(|t| (n.as_str(), t)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        candle_core::safetensors::save(&self.accum, path)
    }

    /// Replace the accumulators with those in `path`. Names that match no
    /// parameter, or shapes that disagree, are errors.
    pub fn load(&mut self, path: &Path, device: &Device) -> Result<()> {
        let loaded = candle_core::safetensors::load(path, device)?;
        for (name, t) in &loaded {
            let Some((_, var)) = self.vars.iter().find(|(n, _)| n == name) else {
                return Err(candle_core::Error::Msg(format!(
                    "optimizer state for unknown parameter {name}"
                )));
            };
            if var.shape() != t.shape() {
                return Err(candle_core::Error::Msg(format!(
                    "optimizer state {name}: shape {:?} != {:?}",
                    t.shape(),
                    var.shape()
                )));
            }
        }
        self.accum = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_accumulates_across_steps() {
        let w = Var::new(&[1.0f32], &Device::Cpu).unwrap();
        let mut opt = MomentumSgd::new(vec![("w".to_string(), w.clone())], 0.5);

        // loss = w, so grad = 1 every step.
        for _ in 0..2 {
            let grads = w.as_tensor().sum_all().unwrap().backward().unwrap();
            opt.step(&grads, 0.1).unwrap();
        }
        // accum: 1 then 1.5; w = 1 - 0.1 - 0.15.
        let v: Vec<f32> = w.as_tensor().to_vec1().unwrap();
        assert!((v[0] - 0.75).abs() < 1e-6);
        let acc: Vec<f32> = opt.accumulator("w").unwrap().to_vec1().unwrap();
        assert!((acc[0] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn state_round_trips_and_rejects_foreign_names() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("optimizer.safetensors");
        let w = Var::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let mut opt = MomentumSgd::new(vec![("w".to_string(), w.clone())], 0.9);
        let grads = w.as_tensor().sqr().unwrap().sum_all().unwrap().backward().unwrap();
        opt.step(&grads, 0.01).unwrap();
        opt.save(&path).unwrap();

        let w2 = Var::new(&[0.0f32, 0.0], &Device::Cpu).unwrap();
        let mut restored = MomentumSgd::new(vec![("w".to_string(), w2)], 0.9);
        restored.load(&path, &Device::Cpu).unwrap();
        let a: Vec<f32> = opt.accumulator("w").unwrap().to_vec1().unwrap();
        let b: Vec<f32> = restored.accumulator("w").unwrap().to_vec1().unwrap();
        assert_eq!(a, b);

        let other = Var::new(&[0.0f32, 0.0], &Device::Cpu).unwrap();
        let mut foreign = MomentumSgd::new(vec![("v".to_string(), other)], 0.9);
        assert!(foreign.load(&path, &Device::Cpu).is_err());
    }
}
