#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use early_trainer::checkpoint::{read_snapshot, write_snapshot};
use early_trainer::report::PlotOptions;
use early_trainer::{
    BatchResult, EarlyClassifier, LoggedSeries, LossFn, Optimizer, Result, SequenceDataset,
    Snapshot, Stats, TrainerConfig, TrainerError, Visualizer,
};
use ndarray::ArrayViewD;
use tch::{Device, Kind, Tensor};

pub const N_CLASSES: usize = 3;
pub const SEQ_LEN: i64 = 5;
pub const N_FEATURES: i64 = 2;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossCall {
    pub loss: LossFn,
    pub training: bool,
    pub tracks_grad: bool,
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<LossCall>,
    pub saves: Vec<PathBuf>,
    pub loads: Vec<PathBuf>,
}

/// Predicts the target class perfectly and reports a loss value identifying
/// which loss function produced it.
pub struct MockModel {
    training: bool,
    recorder: Rc<RefCell<Recorder>>,
    fail_after_calls: Option<usize>,
}

impl MockModel {
    pub fn new() -> (Self, Rc<RefCell<Recorder>>) {
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let model = Self {
            training: false,
            recorder: Rc::clone(&recorder),
            fail_after_calls: None,
        };
        (model, recorder)
    }

    pub fn failing_after(calls: usize) -> (Self, Rc<RefCell<Recorder>>) {
        let (mut model, recorder) = Self::new();
        model.fail_after_calls = Some(calls);
        (model, recorder)
    }

    fn respond(&self, loss_fn: LossFn, inputs: &Tensor, targets: &Tensor) -> Result<BatchResult> {
        if let Some(limit) = self.fail_after_calls {
            if self.recorder.borrow().calls.len() >= limit {
                return Err(TrainerError::Other(anyhow::anyhow!("loss is not finite")));
            }
        }

        let value = match loss_fn {
            LossFn::CrossEntropy => 1.0,
            LossFn::EarlyReward { .. } => 2.0,
            LossFn::EarlySimple { .. } => 3.0,
            LossFn::EarlyLinear { .. } => 4.0,
            LossFn::EarlyCrossEntropy { .. } => 5.0,
        };
        let w = Tensor::from_slice(&[1.0f32]).set_requires_grad(true);
        let loss = (&w * value).sum(Kind::Float);

        self.recorder.borrow_mut().calls.push(LossCall {
            loss: loss_fn,
            training: self.training,
            tracks_grad: loss.requires_grad(),
        });

        let (batch, time) = targets.size2()?;
        let logprobabilities = (targets.onehot(N_CLASSES as i64) * 5.0)
            .log_softmax(-1, Kind::Float)
            .transpose(0, 1);
        let weights = Tensor::ones([batch, time], (Kind::Float, inputs.device())) / time as f64;

        let mut stats = Stats::new();
        stats.insert("earliness", 0.5);
        Ok(BatchResult {
            loss,
            logprobabilities,
            weights,
            stats,
        })
    }
}

impl EarlyClassifier for MockModel {
    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }

    fn loss_cross_entropy(&self, inputs: &Tensor, targets: &Tensor) -> Result<BatchResult> {
        self.respond(LossFn::CrossEntropy, inputs, targets)
    }

    fn early_loss(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        earliness_factor: f64,
    ) -> Result<BatchResult> {
        self.respond(LossFn::EarlyReward { earliness_factor }, inputs, targets)
    }

    fn early_loss_simple(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        alpha: f64,
    ) -> Result<BatchResult> {
        self.respond(LossFn::EarlySimple { alpha }, inputs, targets)
    }

    fn early_loss_linear(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        alpha: f64,
        entropy_factor: f64,
    ) -> Result<BatchResult> {
        self.respond(LossFn::EarlyLinear { alpha, entropy_factor }, inputs, targets)
    }

    fn early_loss_cross_entropy(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        alpha: f64,
        entropy_factor: f64,
    ) -> Result<BatchResult> {
        self.respond(LossFn::EarlyCrossEntropy { alpha, entropy_factor }, inputs, targets)
    }

    fn predict(&self, logprobabilities: &Tensor, _weights: &Tensor) -> Result<Tensor> {
        Ok(logprobabilities.select(0, -1).argmax(-1, false))
    }

    fn save(&self, path: &Path, snapshot: &Snapshot) -> Result<()> {
        write_snapshot(path, snapshot)?;
        self.recorder.borrow_mut().saves.push(path.to_path_buf());
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<Snapshot> {
        self.recorder.borrow_mut().loads.push(path.to_path_buf());
        read_snapshot(path)
    }
}

#[derive(Debug, Default)]
pub struct CountingOptimizer {
    pub steps: u64,
    pub zeroed: u64,
}

impl Optimizer for CountingOptimizer {
    fn zero_grad(&mut self) {
        self.zeroed += 1;
    }

    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        Ok(())
    }

    fn state_dict(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "steps": self.steps }))
    }

    fn load_state_dict(&mut self, state: &serde_json::Value) -> Result<()> {
        self.steps = state["steps"]
            .as_u64()
            .ok_or_else(|| TrainerError::Other(anyhow::anyhow!("missing optimizer steps")))?;
        Ok(())
    }
}

/// Records plot calls into a shared log; optionally fails every call.
pub struct SharedVisualizer {
    pub calls: Rc<RefCell<Vec<String>>>,
    pub fail: bool,
}

impl SharedVisualizer {
    pub fn new(fail: bool) -> (Self, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                calls: Rc::clone(&calls),
                fail,
            },
            calls,
        )
    }

    fn record(&self, call: String) -> Result<()> {
        if self.fail {
            return Err(TrainerError::Other(anyhow::anyhow!("plot server unreachable")));
        }
        self.calls.borrow_mut().push(call);
        Ok(())
    }
}

impl Visualizer for SharedVisualizer {
    fn confusion_matrix(&mut self, hist: ArrayViewD<'_, f64>) -> Result<()> {
        self.record(format!("confusion_matrix:{}", hist.sum()))
    }

    fn plot(&mut self, _: ArrayViewD<'_, f64>, name: &str, _: &PlotOptions) -> Result<()> {
        self.record(format!("plot:{name}"))
    }

    fn bar(&mut self, _: ArrayViewD<'_, f64>, name: &str) -> Result<()> {
        self.record(format!("bar:{name}"))
    }

    fn plot_epochs(&mut self, data: &LoggedSeries) -> Result<()> {
        self.record(format!("plot_epochs:{}", data.epochs("train").len()))
    }
}

/// `n` sequences whose class is `index % N_CLASSES` at every timestep.
pub fn dataset(n: i64, batch_size: usize) -> SequenceDataset {
    let inputs = Tensor::randn([n, SEQ_LEN, N_FEATURES], (Kind::Float, Device::Cpu));
    let targets = Tensor::arange(n, (Kind::Int64, Device::Cpu))
        .remainder(N_CLASSES as i64)
        .view([n, 1])
        .repeat([1, SEQ_LEN]);
    SequenceDataset::new(inputs, targets, N_CLASSES, batch_size, false)
        .expect("valid synthetic dataset")
}

pub fn config(store: &Path) -> TrainerConfig {
    TrainerConfig {
        epochs: 4,
        switch_epoch: 2,
        store: store.to_path_buf(),
        ..Default::default()
    }
}
