//! Core PUCT MCTS (single-threaded, one blocking leaf evaluation per simulation).

use crate::infer::Inference;
use crate::node::NodeId;
use crate::tree::Tree;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma};
use sc_core::{ApplyError, GameState, A};
use sc_infer::InferError;
use thiserror::Error;

/// Below this temperature move selection is greedy.
pub const MIN_TEMPERATURE: f32 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub enum SearchMode {
    /// Root Dirichlet noise drawn from a stream seeded by `noise_seed`.
    SelfPlay { noise_seed: u64 },
    /// No noise; used by the gate.
    Eval,
}

#[derive(Debug, Clone, Copy)]
pub struct MctsConfig {
    pub c_puct: f32,
    pub simulations: u32,
    /// Root Dirichlet alpha (self-play only).
    pub dirichlet_alpha: f32,
    /// Root Dirichlet epsilon mix-in fraction (self-play only).
    pub dirichlet_epsilon: f32,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            c_puct: 1.0,
            simulations: 100,
            dirichlet_alpha: 0.3,
            dirichlet_epsilon: 0.25,
        }
    }
}

impl From<&sc_core::config::MctsConfig> for MctsConfig {
    fn from(c: &sc_core::config::MctsConfig) -> Self {
        Self {
            c_puct: c.c_puct,
            simulations: c.n_rollouts,
            dirichlet_alpha: c.dirichlet_alpha,
            dirichlet_epsilon: c.dirichlet_epsilon,
        }
    }
}

#[derive(Debug, Error)]
pub enum MctsError {
    #[error("invalid config: {msg}")]
    InvalidConfig { msg: &'static str },
    #[error("search started from a terminal state")]
    TerminalRoot,
    #[error("inference failed: {0}")]
    Inference(#[from] InferError),
    #[error("rules engine rejected a legal move: {0}")]
    Rules(#[from] ApplyError),
}

#[derive(Debug, Default, Clone)]
pub struct SearchStats {
    pub node_count: usize,
    pub expansions: u32,
    pub terminal_hits: u32,
    /// Leaf evaluations whose logits were unusable (uniform priors used instead).
    pub fallbacks: u32,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Normalised root visit counts; zero on illegal actions.
    pub pi: [f32; A],
    pub root_value: f32,
    pub root_priors_raw: [f32; A],
    pub root_priors_noisy: Option<[f32; A]>,
    pub stats: SearchStats,
}

pub struct Mcts {
    cfg: MctsConfig,
    tree: Tree,
    stats: SearchStats,
}

type PathStep = (NodeId, usize, u8, u8);

impl Mcts {
    pub fn new(cfg: MctsConfig) -> Result<Self, MctsError> {
        if !(cfg.c_puct.is_finite() && cfg.c_puct > 0.0) {
            return Err(MctsError::InvalidConfig {
                msg: "c_puct must be finite and > 0",
            });
        }
        if cfg.simulations == 0 {
            return Err(MctsError::InvalidConfig {
                msg: "simulations must be > 0",
            });
        }
        if !(cfg.dirichlet_epsilon.is_finite() && (0.0..=1.0).contains(&cfg.dirichlet_epsilon)) {
            return Err(MctsError::InvalidConfig {
                msg: "dirichlet_epsilon must be in [0, 1]",
            });
        }
        Ok(Self {
            cfg,
            tree: Tree::with_capacity(cfg.simulations as usize + 1),
            stats: SearchStats::default(),
        })
    }

    pub fn config(&self) -> &MctsConfig {
        &self.cfg
    }

    /// Run `simulations` simulations from `root_state` and return the visit policy.
    ///
    /// An inference error aborts the search; the caller decides whether to retry.
    pub fn run_search(
        &mut self,
        root_state: &GameState,
        mode: SearchMode,
        infer: &impl Inference,
    ) -> Result<SearchResult, MctsError> {
        if root_state.outcome.is_some() {
            return Err(MctsError::TerminalRoot);
        }
        self.stats = SearchStats::default();
        let root_id = self.tree.reset(*root_state);
        let (raw_priors, _v_root) = self.expand_node(root_id, infer)?;

        let mut root_priors_noisy = None;
        if let SearchMode::SelfPlay { noise_seed } = mode {
            if self.cfg.dirichlet_epsilon > 0.0 {
                let mut rng = ChaCha8Rng::seed_from_u64(noise_seed ^ 0xD1E7_C437_9E37_79B9u64);
                let legal = self.tree[root_id].legal;
                let noisy = apply_root_dirichlet_noise(
                    &raw_priors,
                    &legal,
                    self.cfg.dirichlet_alpha,
                    self.cfg.dirichlet_epsilon,
                    &mut rng,
                );
                self.tree[root_id].p = noisy;
                root_priors_noisy = Some(noisy);
            }
        }

        let mut path: Vec<PathStep> = Vec::with_capacity(64);
        for _ in 0..self.cfg.simulations {
            path.clear();
            let v_leaf = self.select_and_evaluate(root_id, &mut path, infer)?;
            self.backup(&path, v_leaf);
        }

        let (pi, root_value) = self.root_pi_value(root_id);
        self.stats.node_count = self.tree.len();
        Ok(SearchResult {
            pi,
            root_value,
            root_priors_raw: raw_priors,
            root_priors_noisy,
            stats: self.stats.clone(),
        })
    }

    /// Descend to a leaf, creating child nodes as needed; return the leaf value
    /// from the POV of the leaf's player to move.
    fn select_and_evaluate(
        &mut self,
        root_id: NodeId,
        path: &mut Vec<PathStep>,
        infer: &impl Inference,
    ) -> Result<f32, MctsError> {
        let mut node_id = root_id;
        loop {
            let node = &self.tree[node_id];
            if node.is_terminal {
                self.stats.terminal_hits += 1;
                return Ok(node.terminal_z);
            }
            if !node.is_expanded {
                let (_priors, v) = self.expand_node(node_id, infer)?;
                return Ok(v);
            }

            let a = self.select_action(node_id);
            let parent_to_play = node.to_play;
            let child_id = self.tree.child(node_id, a)?;
            let child_to_play = self.tree[child_id].to_play;
            path.push((node_id, a, parent_to_play, child_to_play));
            node_id = child_id;
        }
    }

    fn expand_node(
        &mut self,
        node_id: NodeId,
        infer: &impl Inference,
    ) -> Result<([f32; A], f32), MctsError> {
        let state = self.tree[node_id].state;
        let legal = self.tree[node_id].legal;
        let (logits, v) = infer.eval(&state)?;

        let (priors, used_fallback) = masked_softmax(&logits, &legal);
        if used_fallback {
            self.stats.fallbacks += 1;
        }
        let v = if v.is_finite() {
            v.clamp(-1.0, 1.0)
        } else {
            self.stats.fallbacks += 1;
            0.0
        };

        let n = &mut self.tree[node_id];
        n.is_expanded = true;
        n.p = priors;
        self.stats.expansions += 1;
        Ok((priors, v))
    }

    fn select_action(&self, node_id: NodeId) -> usize {
        let n = &self.tree[node_id];
        // With no visits yet the priors alone decide.
        let sqrt_sum = (n.n_sum.max(1) as f32).sqrt();

        let mut best_score = f32::NEG_INFINITY;
        let mut best_a = 0usize;
        for (a, &ok) in n.legal.iter().enumerate() {
            if !ok {
                continue;
            }
            let u = self.cfg.c_puct * n.p[a] * sqrt_sum / (1.0 + n.n[a] as f32);
            let score = n.q(a) + u;
            // Strict comparison keeps the lowest index on ties.
            if score > best_score {
                best_score = score;
                best_a = a;
            }
        }
        best_a
    }

    fn backup(&mut self, path: &[PathStep], mut v_leaf: f32) {
        // v_leaf is from POV of the leaf state's player_to_move.
        for &(node_id, a_idx, parent_to_play, child_to_play) in path.iter().rev() {
            // Bonus kicks keep the mover, so the sign only flips on a real turn change.
            let v_parent = if parent_to_play != child_to_play {
                -v_leaf
            } else {
                v_leaf
            };

            let n = &mut self.tree[node_id];
            n.n[a_idx] += 1;
            n.w[a_idx] += v_parent;
            n.n_sum += 1;

            v_leaf = v_parent;
        }
    }

    fn root_pi_value(&self, root_id: NodeId) -> ([f32; A], f32) {
        let root = &self.tree[root_id];
        let mut pi = [0.0f32; A];
        let mut sum = 0.0f32;
        for (a, &ok) in root.legal.iter().enumerate() {
            if ok {
                pi[a] = root.n[a] as f32;
                sum += pi[a];
            }
        }
        if sum <= 0.0 {
            return (uniform_over_legal(&root.legal), 0.0);
        }
        let mut v = 0.0f32;
        for a in 0..A {
            v += pi[a] * root.q(a);
            pi[a] /= sum;
        }
        (pi, (v / sum).clamp(-1.0, 1.0))
    }
}

/// Softmax restricted to legal actions. Falls back to uniform-over-legal when
/// the logits give no usable mass; the flag reports the fallback.
pub fn masked_softmax(logits: &[f32; A], legal: &[bool; A]) -> ([f32; A], bool) {
    let mut out = [0.0f32; A];

    let mut max = f32::NEG_INFINITY;
    for (a, &ok) in legal.iter().enumerate() {
        if ok && logits[a].is_finite() {
            max = max.max(logits[a]);
        }
    }
    if !max.is_finite() {
        return (uniform_over_legal(legal), true);
    }

    let mut sum = 0.0f32;
    for a in 0..A {
        if legal[a] && logits[a].is_finite() {
            let z = (logits[a] - max).exp();
            out[a] = z;
            sum += z;
        }
    }
    if !(sum.is_finite() && sum > 0.0) {
        return (uniform_over_legal(legal), true);
    }
    for v in &mut out {
        *v /= sum;
    }
    (out, false)
}

pub fn uniform_over_legal(legal: &[bool; A]) -> [f32; A] {
    let mut out = [0.0f32; A];
    let cnt = legal.iter().filter(|&&ok| ok).count();
    if cnt == 0 {
        return out;
    }
    let u = 1.0 / (cnt as f32);
    for (o, &ok) in out.iter_mut().zip(legal) {
        if ok {
            *o = u;
        }
    }
    out
}

fn apply_root_dirichlet_noise(
    p_raw: &[f32; A],
    legal: &[bool; A],
    alpha: f32,
    eps: f32,
    rng: &mut impl Rng,
) -> [f32; A] {
    let Ok(gamma) = Gamma::new(alpha as f64, 1.0) else {
        return *p_raw;
    };
    // Gamma(alpha, 1) per legal action, normalised -> Dirichlet sample.
    let mut eta = [0.0f64; A];
    let mut sum = 0.0f64;
    for (i, &ok) in legal.iter().enumerate() {
        if ok {
            eta[i] = gamma.sample(rng);
            sum += eta[i];
        }
    }
    if !(sum.is_finite() && sum > 0.0) {
        return *p_raw;
    }

    let mut out = [0.0f32; A];
    for (i, &ok) in legal.iter().enumerate() {
        if ok {
            out[i] = (1.0 - eps) * p_raw[i] + eps * (eta[i] / sum) as f32;
        }
    }
    out
}

/// Executed-move distribution `p_i^(1/t)` over legal actions, renormalised.
///
/// `t == 1` is the identity on a normalised input; `t < MIN_TEMPERATURE` is
/// greedy with ties broken toward the lowest index; a non-finite `t` is
/// uniform over legal actions.
pub fn apply_temperature(pi_target: &[f32; A], legal: &[bool; A], t: f32) -> [f32; A] {
    if t.is_nan() || t < 0.0 || t.is_infinite() {
        return uniform_over_legal(legal);
    }
    if t < MIN_TEMPERATURE {
        let mut best = None::<(usize, f32)>;
        for (i, &ok) in legal.iter().enumerate() {
            if !ok {
                continue;
            }
            let v = pi_target[i];
            match best {
                Some((_, bv)) if v <= bv => {}
                _ => best = Some((i, v)),
            }
        }
        let mut out = [0.0f32; A];
        if let Some((i, _)) = best {
            out[i] = 1.0;
        }
        return out;
    }

    let max = legal
        .iter()
        .zip(pi_target)
        .filter(|(&ok, _)| ok)
        .map(|(_, &p)| p.max(0.0))
        .fold(0.0f32, f32::max);
    if max <= 0.0 {
        return uniform_over_legal(legal);
    }
    let inv_t = 1.0 / t;
    let mut out = [0.0f32; A];
    let mut sum = 0.0f32;
    for (i, &ok) in legal.iter().enumerate() {
        if ok {
            // Scaling by the max first keeps small temperatures from underflowing.
            let w = (pi_target[i].max(0.0) / max).powf(inv_t);
            out[i] = w;
            sum += w;
        }
    }
    if !(sum.is_finite() && sum > 0.0) {
        return uniform_over_legal(legal);
    }
    for v in &mut out {
        *v /= sum;
    }
    out
}

/// Draw an action index from `probs` (assumed normalised). Falls back to the argmax
/// when rounding leaves the cumulative sum short of the draw.
pub fn sample_action(probs: &[f32; A], rng: &mut impl Rng) -> usize {
    let r: f32 = rng.gen::<f32>();
    let mut acc = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        acc += p;
        if r < acc {
            return i;
        }
    }
    let mut best_i = 0usize;
    let mut best_v = f32::NEG_INFINITY;
    for (i, &p) in probs.iter().enumerate() {
        if p > best_v {
            best_v = p;
            best_i = i;
        }
    }
    best_i
}
