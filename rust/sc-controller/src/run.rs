//! The training loop and the standalone gate.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sc_core::features::FEATURE_SCHEMA_ID;
use sc_core::{Config, A};
use sc_eval::{run_gate, GateOptions, GateReport};
use sc_infer::{BoxError, InferenceClient, InferenceServer, ModelSlot, ServerOptions, StatsSnapshot};
use sc_logging::{
    CheckpointEventV1, GateEventV1, InferStatsV1, NdjsonWriter, SelfplayRoundEventV1,
    TrainStepEventV1, VersionInfoV1,
};
use sc_mcts::InferBackend;
use sc_nn::{CheckpointMeta, CheckpointStore};
use sc_replay::{ReplaySampler, ReplayStore, StoreConfig};
use sc_runtime::{games_for_round, run_selfplay_round, RoundConfig, RoundReport};
use sc_train::{Learner, LearnerConfig, StepMetrics};
use tracing::{info, warn};

use crate::layout::{ensure_config_snapshot, ensure_manifest};
use crate::startup::{resolve_start, StartPoint};
use crate::{ControllerError, IterationController, Phase};

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub start: StartPoint,
    pub iterations_run: u64,
    /// Iterations completed over the whole run, including earlier processes.
    pub iteration: u64,
    pub version: u64,
    pub step: u64,
    pub promotions: u64,
    pub gates: Vec<GateReport>,
}

/// Iterations between gates: `max(1, n_total_timesteps / n_evaluations)`.
/// Zero when gating is disabled.
pub fn gate_every(cfg: &Config) -> u64 {
    let n = cfg.gating.n_evaluations as u64;
    if n == 0 {
        return 0;
    }
    (cfg.controller.n_total_timesteps as u64 / n).max(1)
}

/// Whether a gate runs after `completed` iterations (1-based).
pub fn gate_due(completed: u64, cfg: &Config) -> bool {
    let every = gate_every(cfg);
    every > 0 && completed % every == 0 && completed / every <= cfg.gating.n_evaluations as u64
}

/// Process-wide state shared by the phases of a run.
struct Session<'a> {
    ctrl: &'a IterationController,
    cfg: &'a Config,
    config_hash: String,
    metrics: NdjsonWriter,
    ckpts: CheckpointStore,
    client: InferenceClient<Learner>,
    server: InferenceServer<Learner>,
}

impl<'a> Session<'a> {
    fn open(ctrl: &'a IterationController, cfg: &'a Config) -> Result<(Self, StartPoint), ControllerError> {
        cfg.validate()?;
        let layout = ctrl.layout();
        layout.ensure()?;
        let snapshot_hash = ensure_config_snapshot(layout, cfg)?;
        ensure_manifest(layout, &snapshot_hash)?;
        let config_hash = sc_logging::hash_config_bytes(cfg.to_yaml()?.as_bytes());
        if config_hash != snapshot_hash {
            info!(
                snapshot = %layout.config_snapshot().display(),
                "effective config differs from the run's snapshot"
            );
        }
        let metrics = NdjsonWriter::open_append_with_flush(layout.metrics(), 1)?;
        let ckpts = CheckpointStore::open(
            layout.models_dir(),
            cfg.controller.keep_checkpoints as usize,
        )?;

        let mut learner = Learner::new(LearnerConfig::from_config(cfg))?;
        let start = resolve_start(cfg.controller.start_mode, &ckpts, &mut learner)?;
        let server = InferenceServer::spawn(
            learner,
            ServerOptions {
                max_batch: cfg.inference.max_batch,
                thread_name: "sc-infer".to_string(),
            },
        )?;
        let client = server.client();
        Ok((
            Self {
                ctrl,
                cfg,
                config_hash,
                metrics,
                ckpts,
                client,
                server,
            },
            start,
        ))
    }

    fn backend(&self, slot: ModelSlot) -> InferBackend<Learner> {
        InferBackend::new(self.client.clone(), slot)
    }

    fn selfplay(
        &mut self,
        store: &ReplayStore,
        iteration: u64,
        first_game_id: u64,
        n_games: u32,
    ) -> Result<RoundReport, ControllerError> {
        let before = self.client.stats_snapshot();
        let report = run_selfplay_round(
            &RoundConfig::from_config(self.cfg),
            first_game_id,
            n_games,
            &self.backend(ModelSlot::Best),
            store,
        )?;
        let infer = stats_delta(&before, &self.client.stats_snapshot());
        self.metrics.write_event(&SelfplayRoundEventV1 {
            event: "selfplay_round",
            ts_ms: sc_logging::now_ms(),
            v: VersionInfoV1 {
                feature_schema_id: FEATURE_SCHEMA_ID,
                action_space_a: A as u32,
                ruleset_id: sc_logging::RULESET_ID,
            },
            iteration,
            games_requested: report.games_requested,
            games_completed: report.games_completed,
            games_aborted: report.games_aborted,
            samples: report.samples,
            shards_sealed: report.shards_sealed,
            replay_open_games: store.open_games() as u64,
            p0_wins: report.p0_wins,
            p1_wins: report.p1_wins,
            draws: report.draws,
            mean_game_len: report.mean_game_len,
            wall_ms: report.wall_ms,
            infer,
        })?;
        self.ctrl.layout().update_manifest(|m| {
            m.selfplay_games_completed += report.games_completed as u64;
            m.selfplay_games_aborted += report.games_aborted as u64;
        })?;
        Ok(report)
    }

    /// `n_training_steps` steps on "training". Returns `None` when no sealed
    /// shard exists yet.
    fn train(
        &mut self,
        sampler: &mut ReplaySampler,
        rng: &mut ChaCha8Rng,
        iteration: u64,
    ) -> Result<Option<StepMetrics>, ControllerError> {
        if sampler.refresh()? == 0 {
            warn!(iteration, "no sealed replay shard yet; skipping training round");
            return Ok(None);
        }
        let cfg: &'a Config = self.cfg;
        let tc = &cfg.training;
        let mut last = None;
        for i in 0..tc.n_training_steps {
            let batch = sampler.sample_batch(tc.batch_size as usize, rng)?;
            let m = self
                .client
                .exclusive(move |l: &mut Learner| l.train_step(&batch))??;
            let log_every = tc.log_every.max(1) as u64;
            if m.step % log_every == 0 || i + 1 == tc.n_training_steps {
                self.metrics.write_event(&TrainStepEventV1 {
                    event: "train_step",
                    ts_ms: sc_logging::now_ms(),
                    iteration,
                    step: m.step,
                    lr: m.lr,
                    total_loss: m.total_loss as f64,
                    policy_loss: m.policy_loss as f64,
                    value_loss: m.value_loss as f64,
                    reg_loss: m.reg_loss as f64,
                    grad_norm: m.grad_norm,
                    clipped: m.grad_norm > tc.max_grad_norm,
                })?;
            }
            last = Some(m);
        }
        if let Some(m) = last {
            self.ctrl.layout().update_manifest(|mf| {
                mf.train_step = m.step;
                mf.last_total_loss = Some(m.total_loss as f64);
                mf.last_policy_loss = Some(m.policy_loss as f64);
                mf.last_value_loss = Some(m.value_loss as f64);
                mf.last_lr = Some(m.lr);
            })?;
        }
        Ok(last)
    }

    fn gate(&mut self, iteration: u64) -> Result<GateReport, ControllerError> {
        let client = self.client.clone();
        let report = run_gate(
            &GateOptions::from_config(self.cfg).for_iteration(iteration),
            &self.backend(ModelSlot::Training),
            &self.backend(ModelSlot::Best),
            move || {
                client
                    .exclusive(|l: &mut Learner| l.promote())
                    .map_err(BoxError::from)?
                    .map_err(BoxError::from)
            },
            None,
        )?;
        self.metrics.write_event(&GateEventV1 {
            event: "gate",
            ts_ms: sc_logging::now_ms(),
            iteration,
            games: report.games,
            wins: report.cand_wins,
            losses: report.cand_losses,
            draws: report.draws,
            win_rate: report.win_rate,
            threshold: report.threshold,
            decision: report.decision.as_str(),
            seeds_hash: report.seeds_hash.clone(),
            wall_ms: report.wall_ms,
        })?;
        let (promoted, decision) = (report.promoted(), report.decision.as_str());
        let (games, win_rate, draw_rate) = (report.games, report.win_rate, report.draw_rate);
        let seeds_hash = report.seeds_hash.clone();
        self.ctrl.layout().update_manifest(move |m| {
            if promoted {
                m.promotions += 1;
            }
            m.promotion_decision = Some(decision.to_string());
            m.promotion_ts_ms = Some(sc_logging::now_ms());
            m.gate_games = Some(games as u64);
            m.gate_win_rate = Some(win_rate);
            m.gate_draw_rate = Some(draw_rate);
            m.gate_seeds_hash = Some(seeds_hash);
        })?;
        Ok(report)
    }

    fn checkpoint(
        &mut self,
        version: u64,
        iteration: u64,
        promotions: u64,
    ) -> Result<CheckpointMeta, ControllerError> {
        let store = self.ckpts.clone();
        let hash = Some(self.config_hash.clone());
        let meta = self.client.exclusive(move |l: &mut Learner| {
            l.save_checkpoint(&store, version, iteration, promotions, hash)
        })??;
        self.metrics.write_event(&CheckpointEventV1 {
            event: "checkpoint",
            ts_ms: sc_logging::now_ms(),
            iteration,
            version: meta.version,
            step: meta.step,
            path: self.ckpts.ckpt_dir(version).display().to_string(),
        })?;
        self.ctrl.layout().update_manifest(|m| {
            m.checkpoint_version = meta.version;
            m.train_step = meta.step;
            m.controller_iteration = iteration;
        })?;
        Ok(meta)
    }

    fn close(self) -> Result<(), ControllerError> {
        let Session {
            mut metrics,
            client,
            server,
            ..
        } = self;
        metrics.flush()?;
        drop(client);
        server.shutdown()?;
        Ok(())
    }
}

fn stats_delta(a: &StatsSnapshot, b: &StatsSnapshot) -> InferStatsV1 {
    let requests = b.requests.saturating_sub(a.requests);
    let batches = b.batches.saturating_sub(a.batches);
    InferStatsV1 {
        requests,
        batches,
        errors: b.errors.saturating_sub(a.errors),
        max_batch: b.max_batch,
        mean_batch: if batches > 0 {
            requests as f64 / batches as f64
        } else {
            0.0
        },
    }
}

/// Run iterations until `controller.n_total_timesteps` have completed.
///
/// Each iteration plays a self-play round with "best", trains "training",
/// gates when due and commits checkpoint `version + 1`. Failures are recorded
/// in `run.json` and returned.
pub fn run(ctrl: &IterationController, cfg: &Config) -> Result<RunSummary, ControllerError> {
    let res = run_inner(ctrl, cfg);
    if let Err(e) = &res {
        if ctrl.layout().run_json().exists() {
            let _ = ctrl.set_error(e.to_string());
        }
    }
    res
}

fn run_inner(ctrl: &IterationController, cfg: &Config) -> Result<RunSummary, ControllerError> {
    let (mut session, start) = Session::open(ctrl, cfg)?;
    let layout = ctrl.layout();

    let mut sampler = ReplaySampler::new(layout.replay_dir(), cfg.replay.max_cached_shards);
    if cfg.selfplay.skip_first_self_play && sampler.refresh()? == 0 {
        return Err(ControllerError::EmptyReplay(layout.replay_dir()));
    }
    let manifest = layout.read_manifest()?;
    let store = ReplayStore::open(StoreConfig {
        git_hash: manifest.git_hash.clone(),
        config_hash: Some(session.config_hash.clone()),
        ..StoreConfig::new(layout.replay_dir(), &cfg.replay)
    })?;
    let mut next_game_id = manifest.selfplay_games_completed + manifest.selfplay_games_aborted;
    let mut rng = ChaCha8Rng::seed_from_u64(
        cfg.training.seed ^ start.iteration.wrapping_mul(0x9E37_79B9_7F4A_7C15),
    );

    let mut summary = RunSummary {
        start,
        iterations_run: 0,
        iteration: start.iteration,
        version: start.version,
        step: start.step,
        promotions: start.promotions,
        gates: Vec::new(),
    };
    let total = cfg.controller.n_total_timesteps as u64;
    info!(
        resumed = start.resumed,
        version = start.version,
        iteration = start.iteration,
        total,
        "run starting"
    );

    while summary.iteration < total {
        if ctrl.cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let it = summary.iteration;
        let n_games = games_for_round(&cfg.selfplay, summary.iterations_run == 0);
        ctrl.set_phase(
            Phase::Selfplay,
            format!("iteration {}/{}: {n_games} self-play games", it + 1, total),
        )?;
        if n_games > 0 {
            let r = session.selfplay(&store, it, next_game_id, n_games)?;
            next_game_id += r.games_requested as u64;
        }

        ctrl.set_phase(Phase::Train, format!("iteration {}/{}: training", it + 1, total))?;
        if let Some(m) = session.train(&mut sampler, &mut rng, it)? {
            summary.step = m.step;
        }

        if gate_due(it + 1, cfg) {
            ctrl.set_phase(Phase::Gate, format!("iteration {}/{}: gating", it + 1, total))?;
            let report = session.gate(it)?;
            if report.promoted() {
                summary.promotions += 1;
            }
            summary.gates.push(report);
        }

        ctrl.set_phase(
            Phase::Checkpoint,
            format!("iteration {}/{}: checkpoint", it + 1, total),
        )?;
        summary.version += 1;
        summary.iteration += 1;
        let meta = session.checkpoint(summary.version, summary.iteration, summary.promotions)?;
        summary.step = meta.step;
        summary.iterations_run += 1;
    }

    store.close();
    ctrl.set_phase(Phase::Done, "done")?;
    session.close()?;
    Ok(summary)
}

/// One gate against the latest checkpoint. A promotion is persisted as the next
/// checkpoint version.
pub fn gate_once(ctrl: &IterationController, cfg: &Config) -> Result<GateReport, ControllerError> {
    let res = gate_once_inner(ctrl, cfg);
    if let Err(e) = &res {
        if ctrl.layout().run_json().exists() {
            let _ = ctrl.set_error(e.to_string());
        }
    }
    res
}

fn gate_once_inner(ctrl: &IterationController, cfg: &Config) -> Result<GateReport, ControllerError> {
    let mut cfg = cfg.clone();
    cfg.controller.start_mode = sc_core::StartMode::Resume;
    let (mut session, start) = Session::open(ctrl, &cfg)?;
    ctrl.set_phase(Phase::Gate, format!("gate against checkpoint {}", start.version))?;
    let report = session.gate(start.iteration)?;
    if report.promoted() {
        ctrl.set_phase(Phase::Checkpoint, "persisting promotion")?;
        session.checkpoint(start.version + 1, start.iteration, start.promotions + 1)?;
    }
    ctrl.set_phase(Phase::Done, "done")?;
    session.close()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(total: u32, evals: u32) -> Config {
        let mut c = Config::default();
        c.controller.n_total_timesteps = total;
        c.gating.n_evaluations = evals;
        c
    }

    #[test]
    fn gates_are_spread_evenly_and_capped() {
        let c = cfg(500, 10);
        assert_eq!(gate_every(&c), 50);
        let due: Vec<u64> = (1..=500).filter(|&i| gate_due(i, &c)).collect();
        assert_eq!(due.len(), 10);
        assert_eq!(due[0], 50);
        assert_eq!(due[9], 500);

        // More evaluations than iterations: every iteration, capped by the count.
        let c = cfg(3, 10);
        assert_eq!(gate_every(&c), 1);
        assert_eq!((1..=3).filter(|&i| gate_due(i, &c)).count(), 3);

        // 7 / 3 = 2: gates after 2, 4 and 6 only.
        let c = cfg(7, 3);
        let due: Vec<u64> = (1..=7).filter(|&i| gate_due(i, &c)).collect();
        assert_eq!(due, vec![2, 4, 6]);
    }

    #[test]
    fn zero_evaluations_disables_gating() {
        let c = cfg(10, 0);
        assert_eq!(gate_every(&c), 0);
        assert!(!(1..=10).any(|i| gate_due(i, &c)));
    }
}
