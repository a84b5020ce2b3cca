pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod logger;
pub mod loss;
pub mod metric;
pub mod model;
pub mod optim;
pub mod phase;
pub mod report;
pub mod stats;
pub mod train;

pub use checkpoint::Snapshot;
pub use dataset::{DataSource, SequenceDataset};
pub use error::{Result, TrainerError};
pub use logger::{LoggedSeries, Logger, Printer};
pub use loss::{LossFactors, LossFn, LossMode};
pub use metric::ClassMetric;
pub use model::{BatchResult, EarlyClassifier};
pub use optim::{AdamOptimizer, Optimizer};
pub use phase::{Phase, PhaseEvent};
pub use report::{LogVisualizer, Visualizer};
pub use stats::{StatValue, Stats};
pub use train::Trainer;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Total number of epochs over both phases.
    pub epochs: usize,
    /// First epoch of the earliness phase.
    pub switch_epoch: usize,
    pub learning_rate: f64,
    pub earliness_factor: f64,
    pub entropy_factor: f64,
    /// Directory holding the phase checkpoints.
    pub store: PathBuf,
    pub test_every_n_epochs: usize,
    /// Visualization environment; plots are skipped when unset.
    pub visdom_env: Option<String>,
    pub show_n_samples: usize,
    pub loss_mode: LossMode,
    /// Start from scratch even when a classification checkpoint exists.
    pub overwrite: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 4,
            switch_epoch: 2,
            learning_rate: 0.1,
            earliness_factor: 0.7,
            entropy_factor: 0.3,
            store: PathBuf::from("/tmp"),
            test_every_n_epochs: 1,
            visdom_env: None,
            show_n_samples: 1,
            loss_mode: LossMode::TwophaseLinearLoss,
            overwrite: true,
        }
    }
}

impl TrainerConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: TrainerConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.switch_epoch > self.epochs {
            return Err(TrainerError::InvalidSchedule(format!(
                "switch_epoch {} exceeds epochs {}",
                self.switch_epoch, self.epochs
            )));
        }
        if self.test_every_n_epochs == 0 {
            return Err(TrainerError::InvalidSchedule(
                "test_every_n_epochs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn loss_factors(&self) -> LossFactors {
        LossFactors {
            earliness_factor: self.earliness_factor,
            entropy_factor: self.entropy_factor,
        }
    }
}
