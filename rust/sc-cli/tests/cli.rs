use std::path::Path;
use std::process::Command;

use sc_core::Config;

fn sc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sc"))
}

fn touch_shard(dir: &Path, idx: u64) {
    std::fs::write(dir.join(format!("shard_{idx:06}.safetensors")), b"x").unwrap();
    std::fs::write(dir.join(format!("shard_{idx:06}.meta.json")), b"{}").unwrap();
}

#[test]
fn print_config_emits_loadable_defaults() {
    let out = sc().arg("print-config").output().unwrap();
    assert!(out.status.success());
    let yaml = String::from_utf8(out.stdout).unwrap();
    let cfg = Config::from_yaml(&yaml).unwrap();
    assert_eq!(cfg.to_yaml().unwrap(), Config::default().to_yaml().unwrap());
}

#[test]
fn print_config_reflects_the_file() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("c.yaml");
    std::fs::write(&p, "game:\n  max_moves: 33\n").unwrap();
    let out = sc()
        .args(["print-config", "--config"])
        .arg(&p)
        .output()
        .unwrap();
    assert!(out.status.success());
    let cfg = Config::from_yaml(&String::from_utf8(out.stdout).unwrap()).unwrap();
    assert_eq!(cfg.game.max_moves, 33);
}

#[test]
fn invalid_config_exits_non_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("bad.yaml");
    std::fs::write(&p, "game:\n  max_moves: 0\n").unwrap();
    let out = sc()
        .args(["run", "--run-dir"])
        .arg(tmp.path().join("run"))
        .arg("--config")
        .arg(&p)
        .output()
        .unwrap();
    assert!(!out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("max_moves"), "{err}");
    assert!(!tmp.path().join("run").join("run.json").exists());
}

#[test]
fn prune_replay_keeps_the_newest_shards() {
    let tmp = tempfile::tempdir().unwrap();
    for idx in 0..5 {
        touch_shard(tmp.path(), idx);
    }
    let out = sc()
        .args(["prune-replay", "--keep", "2", "--replay-dir"])
        .arg(tmp.path())
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(
        sc_replay::list_shard_indices(tmp.path()).unwrap(),
        vec![3, 4]
    );
    assert!(String::from_utf8_lossy(&out.stdout).contains("pruned 3 of 5"));
}

#[test]
fn resume_on_an_empty_run_dir_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let out = sc()
        .args(["run", "--start-mode", "resume", "--log-level", "warn", "--run-dir"])
        .arg(tmp.path().join("run"))
        .output()
        .unwrap();
    assert!(!out.status.success());
}

#[test]
fn resume_and_gate_reuse_the_run_config() {
    let tmp = tempfile::tempdir().unwrap();
    let smoke = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/smoke.yaml");
    let mut cfg = Config::load(&smoke).unwrap();
    cfg.controller.n_total_timesteps = 1;
    cfg.gating.n_evaluations = 0;
    let cfg_path = tmp.path().join("small.yaml");
    std::fs::write(&cfg_path, cfg.to_yaml().unwrap()).unwrap();
    let run_dir = tmp.path().join("run");

    let out = sc()
        .args(["run", "--log-level", "warn", "--run-dir"])
        .arg(&run_dir)
        .arg("--config")
        .arg(&cfg_path)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let snapshot = std::fs::read(run_dir.join("config.yaml")).unwrap();

    // No --config: the small network in config.yaml must be used, not the defaults.
    let out = sc()
        .args(["run", "--start-mode", "resume", "--log-level", "warn", "--run-dir"])
        .arg(&run_dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("this process 0"));

    let out = sc()
        .args(["gate", "--log-level", "warn", "--run-dir"])
        .arg(&run_dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("gate: games=2"));

    assert_eq!(std::fs::read(run_dir.join("config.yaml")).unwrap(), snapshot);
}
