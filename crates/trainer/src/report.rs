use log::{debug, info};
use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::error::{Result, TrainerError};
use crate::logger::LoggedSeries;
use crate::stats::{Stats, CONFUSION_MATRIX, INPUTS, PROBAS, TARGETS, WEIGHTS};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotOptions {
    pub fill_area: bool,
    pub show_legend: bool,
    pub legend: Vec<String>,
}

/// Live plotting backend.
pub trait Visualizer {
    fn confusion_matrix(&mut self, hist: ArrayViewD<'_, f64>) -> Result<()>;

    fn plot(
        &mut self,
        values: ArrayViewD<'_, f64>,
        name: &str,
        options: &PlotOptions,
    ) -> Result<()>;

    fn bar(&mut self, values: ArrayViewD<'_, f64>, name: &str) -> Result<()>;

    /// Redraws the cumulative per-epoch curves.
    fn plot_epochs(&mut self, data: &LoggedSeries) -> Result<()>;
}

/// Writes plot updates to the log, labelled with the environment name.
#[derive(Debug, Clone)]
pub struct LogVisualizer {
    env: String,
}

impl LogVisualizer {
    pub fn new(env: impl Into<String>) -> Self {
        Self { env: env.into() }
    }
}

impl Visualizer for LogVisualizer {
    fn confusion_matrix(&mut self, hist: ArrayViewD<'_, f64>) -> Result<()> {
        info!("[{}] confusion matrix {:?}:\n{}", self.env, hist.shape(), hist);
        Ok(())
    }

    fn plot(
        &mut self,
        values: ArrayViewD<'_, f64>,
        name: &str,
        options: &PlotOptions,
    ) -> Result<()> {
        debug!(
            "[{}] plot '{}' {:?} legend={:?}",
            self.env,
            name,
            values.shape(),
            options.legend
        );
        Ok(())
    }

    fn bar(&mut self, values: ArrayViewD<'_, f64>, name: &str) -> Result<()> {
        debug!("[{}] bar '{}' {:?}", self.env, name, values.shape());
        Ok(())
    }

    fn plot_epochs(&mut self, data: &LoggedSeries) -> Result<()> {
        for mode in data.modes() {
            for column in data.columns(mode) {
                if let Some((epoch, value)) = data.series(mode, &column).last() {
                    debug!("[{}] {}/{} @ {}: {:.4}", self.env, mode, column, epoch, value);
                }
            }
        }
        Ok(())
    }
}

fn required<'a>(stats: &'a Stats, key: &str) -> Result<&'a ArrayD<f64>> {
    stats
        .array(key)
        .ok_or_else(|| TrainerError::Other(anyhow::anyhow!("evaluation stats lack '{key}'")))
}

/// Leading (batch) dimension of a stats array.
fn batch_len(key: &str, array: &ArrayD<f64>) -> Result<usize> {
    array.shape().first().copied().ok_or_else(|| {
        TrainerError::Other(anyhow::anyhow!("evaluation stats '{key}' is a scalar"))
    })
}

fn ensure_batch(key: &str, array: &ArrayD<f64>, n_samples: usize) -> Result<()> {
    let len = batch_len(key, array)?;
    if len < n_samples {
        return Err(TrainerError::Other(anyhow::anyhow!(
            "evaluation stats '{key}' hold {len} samples, {n_samples} requested"
        )));
    }
    Ok(())
}

/// Draws the evaluation snapshot of one epoch: the confusion matrix and, for
/// the first `show_n_samples` sequences, their class probabilities over time,
/// the first input feature and the per-timestep weights.
pub fn visualize_samples(
    vis: &mut dyn Visualizer,
    stats: &Stats,
    n_classes: usize,
    show_n_samples: usize,
) -> Result<()> {
    vis.confusion_matrix(required(stats, CONFUSION_MATRIX)?.view())?;

    let targets = required(stats, TARGETS)?;
    let inputs = required(stats, INPUTS)?;
    let weights = required(stats, WEIGHTS)?;
    let probas = required(stats, PROBAS)?;

    let legend: Vec<String> = (0..n_classes).map(|c| format!("class {c}")).collect();
    let n_samples = show_n_samples.min(batch_len(TARGETS, targets)?);
    ensure_batch(INPUTS, inputs, n_samples)?;
    ensure_batch(WEIGHTS, weights, n_samples)?;
    if probas.ndim() == 3 {
        ensure_batch(PROBAS, probas, n_samples)?;
    }
    if inputs.ndim() > 2 && inputs.shape()[2] == 0 {
        return Err(TrainerError::Other(anyhow::anyhow!(
            "evaluation stats '{INPUTS}' have no features"
        )));
    }

    for i in 0..n_samples {
        let sample_targets = targets.index_axis(Axis(0), i);
        let class_id = sample_targets.iter().next().copied().unwrap_or_default() as i64;

        // only time-resolved probabilities ([batch, time, class]) are drawn
        if probas.ndim() == 3 {
            let options = PlotOptions {
                fill_area: true,
                show_legend: true,
                legend: legend.clone(),
            };
            vis.plot(
                probas.index_axis(Axis(0), i),
                &format!("sample {i} P(y) (class={class_id})"),
                &options,
            )?;
        }

        let mut x = inputs.index_axis(Axis(0), i);
        if x.ndim() > 1 {
            x = x.index_axis_move(Axis(1), 0);
        }
        vis.plot(x, &format!("sample {i} x (class={class_id})"), &PlotOptions::default())?;
        vis.bar(
            weights.index_axis(Axis(0), i),
            &format!("sample {i} P(t) (class={class_id})"),
        )?;
    }
    Ok(())
}
