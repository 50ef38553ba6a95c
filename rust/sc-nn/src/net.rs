//! Convolutional policy/value network.
//!
//! Input is the POV feature plane stack `[B, 12, 11, 9]`. A 3x3 conv stem feeds
//! a residual trunk; the policy head emits `A` logits and the value head a
//! tanh scalar.

use candle_core::{Device, Result, Tensor, D};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sc_core::config::ModelConfig;
use sc_core::{A, COLS, NUM_CHANNELS, ROWS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    pub in_channels: usize,
    pub n_kernels: usize,
    pub residual_blocks: usize,
}

impl From<&ModelConfig> for NetConfig {
    fn from(m: &ModelConfig) -> Self {
        Self {
            in_channels: NUM_CHANNELS,
            n_kernels: m.n_kernels,
            residual_blocks: m.residual_blocks,
        }
    }
}

/// "cpu" or "cuda" (first GPU; needs the `cuda` feature).
pub fn select_device(name: &str) -> Result<Device> {
    match name {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0),
        other => Err(candle_core::Error::Msg(format!("unknown device {other}"))),
    }
}

const POLICY_PLANES: usize = 2;

fn same_padding() -> Conv2dConfig {
    Conv2dConfig {
        padding: 1,
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
struct ResidualBlock {
    conv1: Conv2d,
    conv2: Conv2d,
}

impl ResidualBlock {
    fn new(k: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv1: conv2d(k, k, 3, same_padding(), vb.pp("conv1"))?,
            conv2: conv2d(k, k, 3, same_padding(), vb.pp("conv2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = self.conv1.forward(x)?.relu()?;
        let y = self.conv2.forward(&y)?;
        (y + x)?.relu()
    }
}

#[derive(Debug, Clone)]
pub struct PolicyValueNet {
    cfg: NetConfig,
    stem: Conv2d,
    blocks: Vec<ResidualBlock>,
    policy_conv: Conv2d,
    policy_fc: Linear,
    value_conv: Conv2d,
    value_fc1: Linear,
    value_fc2: Linear,
}

impl PolicyValueNet {
    pub fn new(cfg: NetConfig, vb: VarBuilder) -> Result<Self> {
        let k = cfg.n_kernels;
        let plane = ROWS * COLS;
        let stem = conv2d(cfg.in_channels, k, 3, same_padding(), vb.pp("stem"))?;
        let blocks = (0..cfg.residual_blocks)
            .map(|i| ResidualBlock::new(k, vb.pp(format!("res{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cfg,
            stem,
            blocks,
            policy_conv: conv2d(k, POLICY_PLANES, 1, Default::default(), vb.pp("policy_conv"))?,
            policy_fc: linear(POLICY_PLANES * plane, A, vb.pp("policy_fc"))?,
            value_conv: conv2d(k, 1, 1, Default::default(), vb.pp("value_conv"))?,
            value_fc1: linear(plane, k, vb.pp("value_fc1"))?,
            value_fc2: linear(k, 1, vb.pp("value_fc2"))?,
        })
    }

    pub fn config(&self) -> NetConfig {
        self.cfg
    }

    /// `x`: `[B, F]` or `[B, C, ROWS, COLS]`. Returns (logits `[B, A]`, value `[B]`).
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let b = x.dim(0)?;
        let x = x.reshape((b, self.cfg.in_channels, ROWS, COLS))?;
        let mut h = self.stem.forward(&x)?.relu()?;
        for blk in &self.blocks {
            h = blk.forward(&h)?;
        }

        let p = self.policy_conv.forward(&h)?.relu()?.flatten_from(1)?;
        let logits = self.policy_fc.forward(&p)?;

        let v = self.value_conv.forward(&h)?.relu()?.flatten_from(1)?;
        let v = self.value_fc1.forward(&v)?.relu()?;
        let value = self.value_fc2.forward(&v)?.tanh()?.squeeze(D::Minus1)?;
        Ok((logits, value))
    }

    /// `sum(w^2)` over every conv and linear weight (biases excluded).
    pub fn l2_penalty(&self) -> Result<Tensor> {
        let mut weights: Vec<&Tensor> = vec![self.stem.weight()];
        for blk in &self.blocks {
            weights.push(blk.conv1.weight());
            weights.push(blk.conv2.weight());
        }
        weights.extend([
            self.policy_conv.weight(),
            self.policy_fc.weight(),
            self.value_conv.weight(),
            self.value_fc1.weight(),
            self.value_fc2.weight(),
        ]);
        let mut total = weights[0].sqr()?.sum_all()?;
        for w in &weights[1..] {
            total = (total + w.sqr()?.sum_all()?)?;
        }
        Ok(total)
    }
}

/// Overwrite every variable with a draw from a ChaCha stream seeded by `seed`:
/// weights uniform in `±1/sqrt(fan_in)`, biases zero. Variables are visited in
/// name order, so the result depends only on the seed and the architecture.
pub fn reinit_seeded(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("varmap lock poisoned".to_string()))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for name in names {
        let var = &data[name];
        let shape = var.shape().clone();
        let dims = shape.dims();
        let n = shape.elem_count();
        let values: Vec<f32> = if name.ends_with("bias") || dims.len() < 2 {
            vec![0.0; n]
        } else {
            let fan_in: usize = dims[1..].iter().product();
            let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
            (0..n).map(|_| rng.gen_range(-bound..bound)).collect()
        };
        let t = Tensor::from_vec(values, shape, var.device())?.to_dtype(var.dtype())?;
        var.set(&t)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn tiny() -> NetConfig {
        NetConfig {
            in_channels: NUM_CHANNELS,
            n_kernels: 4,
            residual_blocks: 1,
        }
    }

    fn build(seed: u64) -> (VarMap, PolicyValueNet) {
        let vm = VarMap::new();
        let vb = VarBuilder::from_varmap(&vm, DType::F32, &Device::Cpu);
        let net = PolicyValueNet::new(tiny(), vb).unwrap();
        reinit_seeded(&vm, seed).unwrap();
        (vm, net)
    }

    #[test]
    fn forward_shapes_and_value_range() {
        let (_vm, net) = build(1);
        let x = Tensor::ones((3, sc_core::F), DType::F32, &Device::Cpu).unwrap();
        let (logits, value) = net.forward(&x).unwrap();
        assert_eq!(logits.dims(), &[3, A]);
        assert_eq!(value.dims(), &[3]);
        for v in value.to_vec1::<f32>().unwrap() {
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn seeded_init_is_reproducible() {
        let (_a, net_a) = build(9);
        let (_b, net_b) = build(9);
        let (_c, net_c) = build(10);
        let x = Tensor::ones((1, sc_core::F), DType::F32, &Device::Cpu).unwrap();
        let la = net_a.forward(&x).unwrap().0.to_vec2::<f32>().unwrap();
        let lb = net_b.forward(&x).unwrap().0.to_vec2::<f32>().unwrap();
        let lc = net_c.forward(&x).unwrap().0.to_vec2::<f32>().unwrap();
        assert_eq!(la, lb);
        assert_ne!(la, lc);
    }

    #[test]
    fn l2_penalty_is_positive_and_finite() {
        let (_vm, net) = build(2);
        let l2 = net.l2_penalty().unwrap().to_scalar::<f32>().unwrap();
        assert!(l2.is_finite() && l2 > 0.0);
    }

    #[test]
    fn unknown_device_is_rejected() {
        assert!(select_device("tpu").is_err());
        assert!(matches!(select_device("cpu"), Ok(Device::Cpu)));
    }
}
