use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sc_core::{Outcome, A, F};

use crate::{
    load_shard, prune_shards_by_idx, read_shard_meta, ReplayError, ReplaySample, ReplayStore,
    StoreConfig, Trajectory,
};

fn store_cfg(dir: &Path, games_per_shard: usize, keep_shards: usize) -> StoreConfig {
    StoreConfig {
        out_dir: dir.to_path_buf(),
        games_per_shard,
        keep_shards,
        write_retries: 1,
        retry_backoff: Duration::from_millis(1),
        git_hash: None,
        config_hash: Some("cfg".to_string()),
    }
}

/// A game whose samples carry the game id in every feature.
fn game(id: u64, len: usize) -> Trajectory {
    Trajectory {
        game_id: id,
        outcome: Outcome::Draw,
        samples: vec![
            ReplaySample {
                features: vec![id as f32; F],
                pi: [1.0 / A as f32; A],
                z: 0.0,
            };
            len
        ],
    }
}

fn shard_exists(dir: &Path, idx: u64) -> bool {
    dir.join(format!("shard_{idx:06}.safetensors")).exists()
        && dir.join(format!("shard_{idx:06}.meta.json")).exists()
}

#[test]
fn full_shard_seals_and_next_game_opens_a_new_one() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("replay");
    let store = ReplayStore::open(store_cfg(&dir, 128, 10)).unwrap();

    for id in 0..127 {
        assert!(store.append(game(id, 2)).unwrap().is_none());
    }
    assert!(!shard_exists(&dir, 0));

    let sealed = store.append(game(127, 2)).unwrap().expect("128th game seals");
    assert_eq!(sealed.idx, 0);
    assert_eq!(sealed.num_games, 128);
    assert_eq!(sealed.num_samples, 256);
    assert!(shard_exists(&dir, 0));
    assert_eq!(store.open_games(), 0);

    assert!(store.append(game(128, 2)).unwrap().is_none());
    assert_eq!(store.open_games(), 1);
    assert_eq!(store.next_shard_idx(), 1);
    assert!(!shard_exists(&dir, 1));

    let meta = read_shard_meta(&dir, 0).unwrap();
    assert_eq!(meta.num_games, 128);
    assert_eq!(meta.num_samples, 256);
    assert_eq!(meta.config_hash.as_deref(), Some("cfg"));
}

#[test]
fn concurrent_writers_seal_one_shard_without_loss_or_duplicates() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("replay");
    let store = Arc::new(ReplayStore::open(store_cfg(&dir, 128, 10)).unwrap());

    let handles: Vec<_> = (0..8u64)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut sealed = 0u32;
                for i in 0..16u64 {
                    if store.append(game(w * 16 + i, 1)).unwrap().is_some() {
                        sealed += 1;
                    }
                }
                sealed
            })
        })
        .collect();
    let seals: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(seals, 1);
    assert_eq!(store.open_games(), 0);

    let shard = load_shard(&dir, 0).unwrap();
    assert_eq!(shard.game_len.len(), 128);
    let ids: BTreeSet<u64> = (0..shard.num_samples())
        .map(|row| shard.features[row * F] as u64)
        .collect();
    assert_eq!(ids, (0..128).collect::<BTreeSet<u64>>());
}

#[test]
fn store_resumes_index_and_cleans_tmp_files() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("replay");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("shard_000004.safetensors"), b"stub").unwrap();
    fs::write(dir.join("shard_000004.meta.json"), b"{}").unwrap();
    fs::write(dir.join("shard_000005.safetensors.tmp"), b"partial").unwrap();

    let store = ReplayStore::open(store_cfg(&dir, 1, 10)).unwrap();
    assert_eq!(store.next_shard_idx(), 5);
    assert!(!dir.join("shard_000005.safetensors.tmp").exists());

    let sealed = store.append(game(1, 3)).unwrap().unwrap();
    assert_eq!(sealed.idx, 5);
    assert!(shard_exists(&dir, 4));
    assert!(shard_exists(&dir, 5));
}

#[test]
fn retention_keeps_newest_shards() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("replay");
    let store = ReplayStore::open(store_cfg(&dir, 1, 2)).unwrap();
    let mut last = None;
    for id in 0..5 {
        last = store.append(game(id, 1)).unwrap();
    }
    let last = last.unwrap();
    assert_eq!(last.idx, 4);
    assert_eq!(last.pruned.after_shards, 2);
    for idx in 0..3 {
        assert!(!shard_exists(&dir, idx));
    }
    assert!(shard_exists(&dir, 3));
    assert!(shard_exists(&dir, 4));
}

#[test]
fn failed_write_keeps_games_in_open_shard() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("replay");
    let store = ReplayStore::open(store_cfg(&dir, 2, 10)).unwrap();

    // Swap the directory for a plain file so every write fails.
    fs::remove_dir_all(&dir).unwrap();
    fs::write(&dir, b"not a dir").unwrap();

    assert!(store.append(game(0, 1)).unwrap().is_none());
    let err = store.append(game(1, 1)).unwrap_err();
    assert!(
        matches!(err, ReplayError::WriteFailed { idx: 0, attempts: 2, .. }),
        "{err:?}"
    );
    assert_eq!(store.open_games(), 2);
    assert_eq!(store.next_shard_idx(), 0);

    fs::remove_file(&dir).unwrap();
    fs::create_dir_all(&dir).unwrap();
    let sealed = store.append(game(2, 1)).unwrap().unwrap();
    assert_eq!(sealed.idx, 0);
    assert_eq!(store.open_games(), 1);

    let shard = load_shard(&dir, 0).unwrap();
    assert_eq!(shard.features[0], 0.0);
    assert_eq!(shard.features[F], 1.0);
}

#[test]
fn prune_keeps_newest_by_idx_and_deletes_pairs() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("replay");
    fs::create_dir_all(&out).unwrap();

    for idx in 0u64..5u64 {
        fs::write(out.join(format!("shard_{idx:06}.safetensors")), b"stub").unwrap();
        fs::write(out.join(format!("shard_{idx:06}.meta.json")), b"{}").unwrap();
    }

    let rep = prune_shards_by_idx(&out, 2).unwrap();
    assert_eq!(rep.before_shards, 5);
    assert_eq!(rep.after_shards, 2);
    assert_eq!(rep.deleted_shards, 3);
    assert_eq!(rep.deleted_min_idx, Some(0));
    assert_eq!(rep.deleted_max_idx, Some(2));

    for idx in 0u64..3u64 {
        assert!(!out.join(format!("shard_{idx:06}.safetensors")).exists());
        assert!(!out.join(format!("shard_{idx:06}.meta.json")).exists());
    }
    for idx in 3u64..5u64 {
        assert!(shard_exists(&out, idx));
    }

    let again = prune_shards_by_idx(&out, 2).unwrap();
    assert_eq!(again.deleted_shards, 0);
    assert_eq!(again.deleted_min_idx, None);
}

#[test]
fn closing_reports_games_of_the_unsealed_shard() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("replay");
    let store = ReplayStore::open(store_cfg(&dir, 4, 10)).unwrap();
    for id in 0..6 {
        store.append(game(id, 1)).unwrap();
    }
    assert_eq!(store.open_games(), 2);
    assert_eq!(store.close(), 2);
    assert_eq!(crate::list_shard_indices(&dir).unwrap(), vec![0]);

    let store = ReplayStore::open(store_cfg(&dir, 4, 10)).unwrap();
    assert_eq!(store.next_shard_idx(), 1);
    assert_eq!(store.close(), 0);
}
