mod common;

use common::*;
use early_trainer::stats::{ACCURACY, CONFUSION_MATRIX, INPUTS, PROBAS, TARGETS, WEIGHTS};
use early_trainer::{
    DataSource, LossFn, LossMode, Phase, PhaseEvent, Trainer, TrainerConfig, TrainerError,
};
use tch::{Device, Tensor};

#[test]
fn phase_events_fire_once_in_order() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (model, recorder) = MockModel::new();
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config(dir.path()),
        Device::Cpu,
    )
    .unwrap();

    trainer.fit().unwrap();

    assert_eq!(
        trainer.fired_events(),
        &[
            (0, PhaseEvent::StartingClassification),
            (2, PhaseEvent::EndingClassification),
            (2, PhaseEvent::StartingEarliness),
            (4, PhaseEvent::EndingEarliness),
        ]
    );
    assert_eq!(
        recorder.borrow().saves,
        vec![trainer.classification_model_path(), trainer.earliness_model_path()]
    );
    assert!(dir.path().join("model_classification.pth").exists());
    assert!(dir.path().join("model_earliness.pth").exists());
    assert_eq!(trainer.epoch(), 4);
    assert_eq!(trainer.optimizer().steps, 8);
    assert_eq!(trainer.optimizer().zeroed, 8);
}

#[test]
fn twophase_linear_loss_switches_after_classification() {
    let dir = tempfile::tempdir().unwrap();
    let (model, recorder) = MockModel::new();
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config(dir.path()),
        Device::Cpu,
    )
    .unwrap();

    trainer.fit().unwrap();

    let linear = LossFn::EarlyLinear {
        alpha: 0.7,
        entropy_factor: 0.3,
    };
    let calls: Vec<LossFn> = recorder.borrow().calls.iter().map(|c| c.loss).collect();
    // 2 training and 2 validation batches per epoch; epoch 1 is the only
    // classification epoch
    assert_eq!(calls.len(), 16);
    assert!(calls[..4].iter().all(|l| *l == LossFn::CrossEntropy));
    assert!(calls[4..].iter().all(|l| *l == linear));
}

#[test]
fn dispatch_follows_the_epoch_phase() {
    let dir = tempfile::tempdir().unwrap();
    let (model, recorder) = MockModel::new();
    let trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(3, 3),
        dataset(3, 3),
        config(dir.path()),
        Device::Cpu,
    )
    .unwrap();
    let (inputs, targets) = sample_batch();

    trainer
        .loss_criterion(&inputs, &targets, Some(Phase::at(1, 2)))
        .unwrap();
    trainer
        .loss_criterion(&inputs, &targets, Some(Phase::at(3, 2)))
        .unwrap();
    trainer.loss_criterion(&inputs, &targets, None).unwrap();

    let calls: Vec<LossFn> = recorder.borrow().calls.iter().map(|c| c.loss).collect();
    assert_eq!(
        calls,
        vec![
            LossFn::CrossEntropy,
            LossFn::EarlyLinear {
                alpha: 0.7,
                entropy_factor: 0.3
            },
            LossFn::CrossEntropy,
        ]
    );
}

#[test]
fn cross_entropy_mode_is_phase_independent() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _) = MockModel::new();
    let config = TrainerConfig {
        loss_mode: LossMode::CrossEntropy,
        ..config(dir.path())
    };
    let trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(3, 3),
        dataset(3, 3),
        config,
        Device::Cpu,
    )
    .unwrap();
    let (inputs, targets) = sample_batch();

    let early = trainer
        .loss_criterion(&inputs, &targets, Some(Phase::Classification))
        .unwrap();
    let late = trainer
        .loss_criterion(&inputs, &targets, Some(Phase::Earliness))
        .unwrap();

    assert_eq!(early.loss.double_value(&[]), late.loss.double_value(&[]));
    assert!(early.logprobabilities.equal(&late.logprobabilities));
    assert!(early.weights.equal(&late.weights));
    assert_eq!(early.stats, late.stats);
}

#[test]
fn test_pass_follows_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let (model, recorder) = MockModel::new();
    let (visualizer, plots) = SharedVisualizer::new(false);
    let config = TrainerConfig {
        test_every_n_epochs: 2,
        ..config(dir.path())
    };
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config,
        Device::Cpu,
    )
    .unwrap()
    .with_visualizer(Box::new(visualizer));

    let logged = trainer.fit().unwrap();

    assert_eq!(logged.epochs("train"), vec![1, 2, 3, 4]);
    assert_eq!(logged.epochs("test"), vec![2, 4]);
    let evaluations = recorder.borrow().calls.iter().filter(|c| !c.training).count();
    assert_eq!(evaluations, 2 * 2);
    assert_eq!(recorder.borrow().saves.len(), 2);

    let plots = plots.borrow();
    let matrices: Vec<&String> = plots.iter().filter(|p| p.starts_with("confusion")).collect();
    assert_eq!(matrices, vec!["confusion_matrix:6", "confusion_matrix:6"]);
    assert_eq!(plots.iter().filter(|p| p.starts_with("plot_epochs")).count(), 4);
}

#[test]
fn evaluation_runs_without_gradients_in_eval_mode() {
    let dir = tempfile::tempdir().unwrap();
    let (model, recorder) = MockModel::new();
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config(dir.path()),
        Device::Cpu,
    )
    .unwrap();

    trainer.train_epoch().unwrap();
    trainer.test_epoch().unwrap();

    let recorder = recorder.borrow();
    let (train, test) = recorder.calls.split_at(2);
    assert!(train.iter().all(|c| c.training && c.tracks_grad));
    assert!(test.iter().all(|c| !c.training && !c.tracks_grad));
    assert_eq!(trainer.optimizer().steps, 2);
}

#[test]
fn test_stats_carry_the_last_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _) = MockModel::new();
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config(dir.path()),
        Device::Cpu,
    )
    .unwrap();

    let stats = trainer.test_epoch().unwrap();

    assert_eq!(stats.scalar(ACCURACY), Some(1.0));
    assert_eq!(stats.scalar("earliness"), Some(0.5));
    assert_eq!(stats.scalar("loss"), Some(1.0));
    let confusion = stats.array(CONFUSION_MATRIX).unwrap();
    assert_eq!(confusion.shape(), &[3, 3]);
    assert_eq!(confusion.sum(), 6.0);
    assert_eq!(stats.array(TARGETS).unwrap().shape(), &[2, 5]);
    assert_eq!(stats.array(INPUTS).unwrap().shape(), &[2, 5, 2]);
    assert_eq!(stats.array(WEIGHTS).unwrap().shape(), &[2, 5]);

    // batch-major probabilities that sum to one per timestep
    let probas = stats.array(PROBAS).unwrap();
    assert_eq!(probas.shape(), &[2, 5, 3]);
    let total: f64 = probas.sum();
    assert!((total - 10.0).abs() < 1e-4);
}

#[test]
fn batch_failure_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (model, recorder) = MockModel::failing_after(5);
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config(dir.path()),
        Device::Cpu,
    )
    .unwrap();

    let err = trainer.fit().unwrap_err();

    assert!(matches!(err, TrainerError::Other(_)));
    assert_eq!(trainer.epoch(), 2);
    assert!(recorder.borrow().saves.is_empty());
    assert!(!trainer.earliness_model_path().exists());
}

#[test]
fn failing_visualizer_does_not_stop_training() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _) = MockModel::new();
    let (visualizer, plots) = SharedVisualizer::new(true);
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config(dir.path()),
        Device::Cpu,
    )
    .unwrap()
    .with_visualizer(Box::new(visualizer));

    let logged = trainer.fit().unwrap();

    assert_eq!(logged.epochs("test"), vec![1, 2, 3, 4]);
    assert!(plots.borrow().is_empty());
    assert_eq!(trainer.fired_events().len(), 4);
}

#[test]
fn configured_environment_logs_plots() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (model, _) = MockModel::new();
    let config = TrainerConfig {
        visdom_env: Some("early-rnn".to_string()),
        show_n_samples: 3,
        ..config(dir.path())
    };
    let mut trainer = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(6, 4),
        dataset(6, 4),
        config,
        Device::Cpu,
    )
    .unwrap();

    let logged = trainer.fit().unwrap();
    assert_eq!(logged.series("test", ACCURACY).len(), 4);
}

#[test]
fn switch_after_last_epoch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _) = MockModel::new();
    let config = TrainerConfig {
        epochs: 2,
        switch_epoch: 3,
        ..config(dir.path())
    };
    let result = Trainer::new(
        model,
        CountingOptimizer::default(),
        dataset(3, 3),
        dataset(3, 3),
        config,
        Device::Cpu,
    );
    assert!(matches!(result, Err(TrainerError::InvalidSchedule(_))));
}

fn sample_batch() -> (Tensor, Tensor) {
    let mut data = dataset(3, 3);
    let batch = data.batches().next().unwrap();
    batch.unwrap()
}
