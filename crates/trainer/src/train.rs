use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use tch::{Device, Tensor};

use crate::checkpoint::Snapshot;
use crate::dataset::DataSource;
use crate::error::Result;
use crate::logger::{LoggedSeries, Logger, Printer, TEST_MODE, TRAIN_MODE};
use crate::loss::loss_criterion;
use crate::metric::ClassMetric;
use crate::model::{BatchResult, EarlyClassifier};
use crate::optim::Optimizer;
use crate::phase::{events_at, Phase, PhaseEvent};
use crate::report::{visualize_samples, LogVisualizer, Visualizer};
use crate::stats::{
    tensor_to_array, tensor_to_labels, Stats, ACCURACY, CONFUSION_MATRIX, INPUTS, LOSS, PROBAS,
    TARGETS, WEIGHTS,
};
use crate::TrainerConfig;

/// Two-phase training loop: cross-entropy style classification first, then
/// earliness from `switch_epoch` on, with a checkpoint at the end of each phase.
pub struct Trainer<M, O, D> {
    config: TrainerConfig,
    model: M,
    optimizer: O,
    train_data: D,
    valid_data: D,
    n_classes: usize,
    device: Device,
    logger: Logger,
    visualizer: Option<Box<dyn Visualizer>>,
    epoch: usize,
    /// Last epoch whose phase events were handled.
    events_checked: Option<usize>,
    fired: Vec<(usize, PhaseEvent)>,
}

impl<M, O, D> Trainer<M, O, D>
where
    M: EarlyClassifier,
    O: Optimizer,
    D: DataSource,
{
    /// Resumes from the classification checkpoint in `config.store` when one
    /// exists and `config.overwrite` is false.
    pub fn new(
        model: M,
        optimizer: O,
        train_data: D,
        valid_data: D,
        config: TrainerConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;

        let visualizer = config
            .visdom_env
            .as_ref()
            .map(|env| Box::new(LogVisualizer::new(env.clone())) as Box<dyn Visualizer>);

        let mut trainer = Self {
            n_classes: train_data.n_classes(),
            config,
            model,
            optimizer,
            train_data,
            valid_data,
            device,
            logger: Logger::new(&[TRAIN_MODE, TEST_MODE]),
            visualizer,
            epoch: 0,
            events_checked: None,
            fired: Vec::new(),
        };

        let path = trainer.classification_model_path();
        if path.exists() && !trainer.config.overwrite {
            info!("Resuming from snapshot {:?}.", path);
            trainer.resume(&path)?;
        }

        Ok(trainer)
    }

    pub fn with_visualizer(mut self, visualizer: Box<dyn Visualizer>) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    /// Restores epoch, optimizer state and logged series. Phase events up to
    /// the restored epoch are treated as already fired.
    pub fn resume(&mut self, path: &Path) -> Result<()> {
        let snapshot = self.model.load(path)?;
        self.optimizer.load_state_dict(&snapshot.optimizer_state)?;
        self.logger.resume(snapshot.logged_data);
        self.epoch = snapshot.epoch;
        self.events_checked = Some(snapshot.epoch);
        Ok(())
    }

    pub fn snapshot(&self, path: &Path) -> Result<()> {
        if !self.config.store.exists() {
            fs::create_dir_all(&self.config.store)?;
        }
        let snapshot = Snapshot {
            epoch: self.epoch,
            optimizer_state: self.optimizer.state_dict()?,
            logged_data: self.logger.get_data().clone(),
        };
        self.model.save(path, &snapshot)?;
        info!("Saved snapshot of epoch {} to {:?}", self.epoch, path);
        Ok(())
    }

    pub fn fit(&mut self) -> Result<LoggedSeries> {
        let printer = Printer;

        while self.epoch < self.config.epochs {
            self.new_epoch()?;

            self.logger.set_mode(TRAIN_MODE);
            let stats = self.train_epoch()?;
            self.logger.log(&stats, self.epoch);
            printer.print(&stats, self.epoch, "train: ");

            let evaluation = if self.epoch % self.config.test_every_n_epochs == 0 {
                self.logger.set_mode(TEST_MODE);
                let stats = self.test_epoch()?;
                self.logger.log(&stats, self.epoch);
                printer.print(&stats, self.epoch, "valid: ");
                Some(stats)
            } else {
                None
            };

            self.visualize(evaluation.as_ref());
        }

        self.check_events()?;
        Ok(self.logger.get_data().clone())
    }

    fn new_epoch(&mut self) -> Result<()> {
        self.check_events()?;
        self.epoch += 1;
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        Phase::at(self.epoch, self.config.switch_epoch)
    }

    /// Fires the events due at the current epoch, at most once per epoch.
    fn check_events(&mut self) -> Result<()> {
        if matches!(self.events_checked, Some(done) if self.epoch <= done) {
            return Ok(());
        }
        self.events_checked = Some(self.epoch);

        for event in events_at(self.epoch, self.config.switch_epoch, self.config.epochs) {
            info!("{}", event.describe());
            self.fired.push((self.epoch, event));
            if let Some(phase) = event.checkpoint() {
                self.snapshot(&phase.checkpoint_path(&self.config.store))?;
            }
        }
        Ok(())
    }

    /// Loss of the configured mode; `phase = None` selects plain cross-entropy.
    pub fn loss_criterion(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        phase: Option<Phase>,
    ) -> Result<BatchResult> {
        loss_criterion(
            &self.model,
            self.config.loss_mode,
            phase,
            self.config.loss_factors(),
            inputs,
            targets,
        )
    }

    /// One optimization pass over the training data. Returns the stats folded
    /// up to the last batch.
    pub fn train_epoch(&mut self) -> Result<Stats> {
        self.model.train();

        let mut metric = ClassMetric::new(self.n_classes);
        let mut stats = Stats::new();
        let phase = Some(self.phase());
        let factors = self.config.loss_factors();

        for batch in self.train_data.batches() {
            let (inputs, targets) = batch?;
            self.optimizer.zero_grad();

            let inputs = inputs.to_device(self.device);
            let targets = targets.to_device(self.device);

            let result = loss_criterion(
                &self.model,
                self.config.loss_mode,
                phase,
                factors,
                &inputs,
                &targets,
            )?;
            let prediction = self.model.predict(&result.logprobabilities, &result.weights)?;

            result.loss.f_backward()?;
            self.optimizer.step()?;

            stats = metric.add(batch_stats(&result)?);
            let accuracy = metric.update_confmat(
                &majority_labels(&targets)?,
                &tensor_to_labels(&prediction)?,
            )?;
            stats.insert(ACCURACY, accuracy);
        }

        Ok(stats)
    }

    /// Evaluation pass without gradient tracking. The returned stats also
    /// carry the confusion matrix and the last batch for visualization.
    pub fn test_epoch(&mut self) -> Result<Stats> {
        self.model.eval();
        let _guard = tch::no_grad_guard();

        let mut metric = ClassMetric::new(self.n_classes);
        let mut stats = Stats::new();
        let phase = Some(self.phase());
        let factors = self.config.loss_factors();
        let mut last_batch = None;

        for batch in self.valid_data.batches() {
            let (inputs, targets) = batch?;
            let inputs = inputs.to_device(self.device);
            let targets = targets.to_device(self.device);

            let result = loss_criterion(
                &self.model,
                self.config.loss_mode,
                phase,
                factors,
                &inputs,
                &targets,
            )?;
            let prediction = self.model.predict(&result.logprobabilities, &result.weights)?;

            stats = metric.add(batch_stats(&result)?);
            let accuracy = metric.update_confmat(
                &majority_labels(&targets)?,
                &tensor_to_labels(&prediction)?,
            )?;
            stats.insert(ACCURACY, accuracy);

            last_batch = Some((inputs, targets, result.logprobabilities, result.weights));
        }

        for (key, value) in metric.summary() {
            stats.insert(key, value);
        }
        stats.insert(CONFUSION_MATRIX, metric.hist_array());

        if let Some((inputs, targets, logprobabilities, weights)) = last_batch {
            stats.insert(TARGETS, tensor_to_array(&targets)?);
            stats.insert(INPUTS, tensor_to_array(&inputs)?);
            stats.insert(WEIGHTS, tensor_to_array(&weights)?);

            let probas = logprobabilities.exp();
            let probas = if probas.dim() == 3 {
                probas.transpose(0, 1)
            } else {
                probas
            };
            stats.insert(PROBAS, tensor_to_array(&probas)?);
        }

        Ok(stats)
    }

    fn visualize(&mut self, evaluation: Option<&Stats>) {
        let Some(vis) = self.visualizer.as_deref_mut() else {
            return;
        };

        let show_n_samples = self.config.show_n_samples;
        if let Some(stats) = evaluation {
            if let Err(e) = visualize_samples(vis, stats, self.n_classes, show_n_samples) {
                warn!("Could not visualize epoch {}: {}", self.epoch, e);
            }
        }
        if let Err(e) = vis.plot_epochs(self.logger.get_data()) {
            warn!("Could not update epoch plots: {}", e);
        }
    }

    pub fn classification_model_path(&self) -> PathBuf {
        Phase::Classification.checkpoint_path(&self.config.store)
    }

    pub fn earliness_model_path(&self) -> PathBuf {
        Phase::Earliness.checkpoint_path(&self.config.store)
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Phase events fired by this trainer, with the epoch they fired at.
    pub fn fired_events(&self) -> &[(usize, PhaseEvent)] {
        &self.fired
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }
}

/// Model stats of one batch, with the loss value added when the model does
/// not report it.
fn batch_stats(result: &BatchResult) -> Result<Stats> {
    let mut stats = result.stats.clone();
    if stats.get(LOSS).is_none() {
        stats.insert_tensor(LOSS, &result.loss)?;
    }
    Ok(stats)
}

/// Most frequent class of every sequence, `targets` being `[batch, time]`.
fn majority_labels(targets: &Tensor) -> Result<Vec<i64>> {
    let (mode, _) = targets.f_mode(1, false)?;
    tensor_to_labels(&mode)
}
