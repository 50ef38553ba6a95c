//! sc: CLI binary for the paper soccer training pipeline.
//!
//! Subcommands:
//! - run
//! - gate
//! - prune-replay
//! - print-config

use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use sc_controller::{ControllerError, IterationController, RunLayout};
use sc_core::{Config, StartMode};

#[derive(Parser)]
#[command(name = "sc")]
#[command(version, about = "AlphaZero-style self-play training for paper soccer", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StartModeArg {
    Auto,
    Fresh,
    Resume,
}

impl From<StartModeArg> for StartMode {
    fn from(m: StartModeArg) -> Self {
        match m {
            StartModeArg::Auto => StartMode::Auto,
            StartModeArg::Fresh => StartMode::Fresh,
            StartModeArg::Resume => StartMode::Resume,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run self-play, training and gating until the configured number of iterations.
    Run {
        #[arg(long)]
        run_dir: PathBuf,
        /// YAML config; defaults apply to missing keys. Without it an existing
        /// run reuses its config.yaml.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overrides controller.start_mode.
        #[arg(long, value_enum)]
        start_mode: Option<StartModeArg>,
    },
    /// Gate the latest checkpoint's "training" against its "best".
    Gate {
        #[arg(long)]
        run_dir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Keep the newest N replay shards and delete the rest.
    PruneReplay {
        #[arg(long)]
        replay_dir: PathBuf,
        #[arg(long)]
        keep: usize,
    },
    /// Print the effective config as YAML.
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, sc_core::ConfigError> {
    let cfg = match path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// `--config` wins; otherwise an existing run keeps the config it was created with.
fn load_run_config(path: Option<&PathBuf>, layout: &RunLayout) -> Result<Config, ControllerError> {
    if path.is_none() {
        if let Some(cfg) = layout.load_config()? {
            cfg.validate()?;
            return Ok(cfg);
        }
    }
    Ok(load_config(path)?)
}

fn exit_with(e: &dyn Error) -> ! {
    eprintln!("error: {e}");
    let mut src = e.source();
    while let Some(s) = src {
        eprintln!("  caused by: {s}");
        src = s.source();
    }
    process::exit(1);
}

fn cmd_run(run_dir: PathBuf, config: Option<PathBuf>, start_mode: Option<StartModeArg>) {
    let layout = RunLayout::new(&run_dir);
    let mut cfg = load_run_config(config.as_ref(), &layout).unwrap_or_else(|e| exit_with(&e));
    if let Some(m) = start_mode {
        cfg.controller.start_mode = m.into();
    }
    let ctrl = IterationController::new(layout);
    let s = sc_controller::run(&ctrl, &cfg).unwrap_or_else(|e| exit_with(&e));
    println!(
        "run complete: iterations={} (this process {}), checkpoint v{}, step {}, promotions {}",
        s.iteration, s.iterations_run, s.version, s.step, s.promotions
    );
}

fn cmd_gate(run_dir: PathBuf, config: Option<PathBuf>) {
    let layout = RunLayout::new(&run_dir);
    let cfg = load_run_config(config.as_ref(), &layout).unwrap_or_else(|e| exit_with(&e));
    let ctrl = IterationController::new(layout);
    let r = sc_controller::gate_once(&ctrl, &cfg).unwrap_or_else(|e| exit_with(&e));
    println!(
        "gate: games={} wins={} losses={} draws={} win_rate={:.4} threshold={:.4} decision={}",
        r.games,
        r.cand_wins,
        r.cand_losses,
        r.draws,
        r.win_rate,
        r.threshold,
        r.decision.as_str()
    );
    println!("seeds_hash={}", r.seeds_hash);
}

fn cmd_prune_replay(replay_dir: PathBuf, keep: usize) {
    let r = sc_replay::prune_shards_by_idx(&replay_dir, keep).unwrap_or_else(|e| exit_with(&e));
    println!(
        "pruned {} of {} shards ({} kept)",
        r.deleted_shards, r.before_shards, r.after_shards
    );
    if let (Some(lo), Some(hi)) = (r.deleted_min_idx, r.deleted_max_idx) {
        println!("deleted indices {lo}..={hi}");
    }
}

fn cmd_print_config(config: Option<PathBuf>) {
    let cfg = load_config(config.as_ref()).unwrap_or_else(|e| exit_with(&e));
    let yaml = cfg.to_yaml().unwrap_or_else(|e| exit_with(&e));
    print!("{yaml}");
}

fn main() {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::PrintConfig { .. }) {
        // A subscriber installed by an embedding harness is fine.
        let _ = sc_logging::init_tracing(&cli.log_level);
    }
    match cli.command {
        Commands::Run {
            run_dir,
            config,
            start_mode,
        } => cmd_run(run_dir, config, start_mode),
        Commands::Gate { run_dir, config } => cmd_gate(run_dir, config),
        Commands::PruneReplay { replay_dir, keep } => cmd_prune_replay(replay_dir, keep),
        Commands::PrintConfig { config } => cmd_print_config(config),
    }
}
