use std::path::Path;

use tch::Tensor;

use crate::checkpoint::Snapshot;
use crate::error::Result;
use crate::stats::Stats;

/// Output of one loss evaluation over a batch.
#[derive(Debug)]
pub struct BatchResult {
    /// Scalar loss, backpropagated during training.
    pub loss: Tensor,
    /// `[time, batch, class]` or `[batch, class]`.
    pub logprobabilities: Tensor,
    /// Per-timestep weights, `[batch, time]`.
    pub weights: Tensor,
    pub stats: Stats,
}

/// Sequence classifier trained for early decisions.
///
/// Losses take the raw batch and return the forward pass results together
/// with the loss; the trainer never calls a forward method directly.
pub trait EarlyClassifier {
    /// Enables stochastic regularization such as dropout.
    fn train(&mut self);

    fn eval(&mut self);

    fn loss_cross_entropy(&self, inputs: &Tensor, targets: &Tensor) -> Result<BatchResult>;

    /// Rewards correct early decisions only.
    fn early_loss(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        earliness_factor: f64,
    ) -> Result<BatchResult>;

    fn early_loss_simple(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        alpha: f64,
    ) -> Result<BatchResult>;

    /// Linear classification loss with a t/T earliness term.
    fn early_loss_linear(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        alpha: f64,
        entropy_factor: f64,
    ) -> Result<BatchResult>;

    fn early_loss_cross_entropy(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        alpha: f64,
        entropy_factor: f64,
    ) -> Result<BatchResult>;

    /// Hard class prediction per sequence, `[batch]`.
    fn predict(&self, logprobabilities: &Tensor, weights: &Tensor) -> Result<Tensor>;

    /// Writes weights together with the training snapshot.
    fn save(&self, path: &Path, snapshot: &Snapshot) -> Result<()>;

    /// Restores weights and returns the snapshot stored alongside them.
    fn load(&mut self, path: &Path) -> Result<Snapshot>;
}
