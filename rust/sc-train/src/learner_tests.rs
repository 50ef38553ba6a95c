use sc_core::{apply_move, encode_state, initial_state, LrScheduleKind, A, F, NUM_CHANNELS};
use sc_infer::{Evaluator, InferenceServer, ModelSlot, ServerOptions};
use sc_nn::{CheckpointStore, NetConfig};
use sc_replay::Batch;

use crate::{Learner, LearnerConfig, LrSchedule, TrainError};

fn cfg(n_kernels: usize) -> LearnerConfig {
    LearnerConfig {
        net: NetConfig {
            in_channels: NUM_CHANNELS,
            n_kernels,
            residual_blocks: 1,
        },
        device: "cpu".to_string(),
        seed: 0,
        reg_fact: 1e-4,
        vf_coef: 1.0,
        momentum: 0.9,
        max_grad_norm: 5.0,
        schedule: LrSchedule {
            kind: LrScheduleKind::Constant,
            initial_lr: 1e-2,
            decay_factor: 0.1,
            decay_steps: 1,
            horizon: 100,
        },
    }
}

/// Positions along a short game, each with a one-hot policy and alternating z.
fn fixed_batch() -> Batch {
    let mut s = initial_state(200);
    let mut batch = Batch::default();
    for i in 0..8 {
        batch.features.extend(encode_state(&s));
        let mut pi = [0.0f32; A];
        pi[i % A] = 1.0;
        batch.pi.extend_from_slice(&pi);
        batch.z.push(if i % 2 == 0 { 1.0 } else { -1.0 });
        let legal = sc_core::legal_moves(&s);
        let a = (0..A)
            .find(|&a| legal[a] && !apply_move(&s, a).unwrap().terminal)
            .unwrap();
        s = apply_move(&s, a).unwrap().state;
    }
    batch
}

fn outputs(l: &mut Learner, slot: ModelSlot) -> Vec<sc_infer::Evaluation> {
    let x = encode_state(&initial_state(200));
    l.evaluate_batch(slot, &[&x]).unwrap()
}

#[test]
fn loss_decreases_on_a_fixed_batch() {
    let mut l = Learner::new(cfg(8)).unwrap();
    let batch = fixed_batch();
    let first = l.train_step(&batch).unwrap();
    let mut last = first;
    for _ in 0..40 {
        last = l.train_step(&batch).unwrap();
    }
    assert_eq!(last.step, 41);
    assert!(
        last.total_loss < first.total_loss,
        "first={} last={}",
        first.total_loss,
        last.total_loss
    );
    assert!(first.reg_loss > 0.0);
}

#[test]
fn training_updates_only_the_training_slot() {
    let mut l = Learner::new(cfg(4)).unwrap();
    let best_before = outputs(&mut l, ModelSlot::Best);
    for _ in 0..3 {
        l.train_step(&fixed_batch()).unwrap();
    }
    assert_eq!(outputs(&mut l, ModelSlot::Best), best_before);
    assert_ne!(outputs(&mut l, ModelSlot::Training), best_before);
}

#[test]
fn non_finite_input_fails_without_touching_parameters() {
    let mut l = Learner::new(cfg(4)).unwrap();
    let before = outputs(&mut l, ModelSlot::Training);
    let mut batch = fixed_batch();
    batch.features[5] = f32::NAN;
    let err = l.train_step(&batch).unwrap_err();
    assert!(matches!(err, TrainError::NonFiniteLoss { step: 0, .. }), "{err}");
    assert_eq!(l.step(), 0);
    assert_eq!(outputs(&mut l, ModelSlot::Training), before);
}

fn momentum_values(l: &Learner) -> Vec<Vec<f32>> {
    l.optimizer()
        .accumulators()
        .map(|(_, t)| t.flatten_all().unwrap().to_vec1::<f32>().unwrap())
        .collect()
}

#[test]
fn overflowing_gradient_fails_without_touching_parameters() {
    let mut l = Learner::new(cfg(4)).unwrap();
    l.train_step(&fixed_batch()).unwrap();
    let before = outputs(&mut l, ModelSlot::Training);
    let momentum_before = momentum_values(&l);
    assert!(!momentum_before.is_empty());

    let mut batch = fixed_batch();
    // The loss stays finite in f32 but squared gradients overflow.
    batch.pi[0] = 1e30;
    let err = l.train_step(&batch).unwrap_err();
    match err {
        TrainError::NonFiniteGradient { step, norm } => {
            assert_eq!(step, 1);
            assert!(!norm.is_finite());
        }
        other => panic!("expected a gradient error, got {other}"),
    }
    assert_eq!(l.step(), 1);
    assert_eq!(outputs(&mut l, ModelSlot::Training), before);
    assert_eq!(momentum_values(&l), momentum_before);

    l.train_step(&fixed_batch()).unwrap();
    assert_eq!(l.step(), 2);
}

#[test]
fn malformed_batch_is_rejected() {
    let mut l = Learner::new(cfg(4)).unwrap();
    let mut batch = fixed_batch();
    batch.features.truncate(F);
    assert!(matches!(
        l.train_step(&batch),
        Err(TrainError::InvalidBatch(_))
    ));
    assert!(matches!(
        l.train_step(&Batch::default()),
        Err(TrainError::InvalidBatch(_))
    ));
}

#[test]
fn checkpoint_at_version_seven_resumes_step_and_state() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(tmp.path().join("models"), 3).unwrap();
    let mut l = Learner::new(cfg(4)).unwrap();
    for _ in 0..3 {
        l.train_step(&fixed_batch()).unwrap();
    }
    let meta = l
        .save_checkpoint(&store, 7, 6, 1, Some("abc".to_string()))
        .unwrap();
    assert_eq!(meta.step, 3);

    let mut r = Learner::new(LearnerConfig {
        seed: 99,
        ..cfg(4)
    })
    .unwrap();
    let restored = r.restore_latest(&store).unwrap().expect("checkpoint present");
    assert_eq!(restored.version, 7);
    assert_eq!(restored.iteration, 6);
    assert_eq!(restored.promotions, 1);
    assert_eq!(restored.config_hash.as_deref(), Some("abc"));
    assert_eq!(r.step(), 3);
    assert_eq!(restored.version + 1, 8);

    for slot in [ModelSlot::Best, ModelSlot::Training] {
        assert_eq!(outputs(&mut r, slot), outputs(&mut l, slot));
    }
    let name = "stem.weight";
    let a: Vec<f32> = l
        .optimizer()
        .accumulator(name)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    let b: Vec<f32> = r
        .optimizer()
        .accumulator(name)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert_eq!(a, b);

    // Identical state means identical next steps.
    let ml = l.train_step(&fixed_batch()).unwrap();
    let mr = r.train_step(&fixed_batch()).unwrap();
    assert_eq!(mr.step, 4);
    assert!((ml.total_loss - mr.total_loss).abs() < 1e-5);
}

#[test]
fn restore_rejects_a_different_architecture() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(tmp.path().join("models"), 3).unwrap();
    Learner::new(cfg(4))
        .unwrap()
        .save_checkpoint(&store, 1, 0, 0, None)
        .unwrap();
    let mut wider = Learner::new(cfg(8)).unwrap();
    assert!(matches!(
        wider.restore_latest(&store),
        Err(TrainError::ArchitectureMismatch { .. })
    ));
}

#[test]
fn promotion_through_the_inference_server_is_visible_to_best_requests() {
    let server = InferenceServer::spawn(Learner::new(cfg(4)).unwrap(), ServerOptions::default())
        .unwrap();
    let client = server.client();
    let x = encode_state(&initial_state(200));

    let best_before = client.evaluate(ModelSlot::Best, x.clone()).unwrap();
    let batch = fixed_batch();
    for _ in 0..3 {
        client
            .exclusive({
                let batch = batch.clone();
                move |l: &mut Learner| l.train_step(&batch).map(|_| ())
            })
            .unwrap()
            .unwrap();
    }
    let trained = client.evaluate(ModelSlot::Training, x.clone()).unwrap();
    assert_eq!(client.evaluate(ModelSlot::Best, x.clone()).unwrap(), best_before);
    assert_ne!(trained, best_before);

    client
        .exclusive(|l: &mut Learner| l.promote())
        .unwrap()
        .unwrap();
    assert_eq!(client.evaluate(ModelSlot::Best, x).unwrap(), trained);
    let equal = client
        .exclusive(|l: &mut Learner| l.pair().slots_equal())
        .unwrap()
        .unwrap();
    assert!(equal);
}
