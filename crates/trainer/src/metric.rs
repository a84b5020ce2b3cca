use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayD};

use crate::error::{Result, TrainerError};
use crate::stats::{StatValue, Stats};

pub const KAPPA: &str = "kappa";
pub const MEAN_RECALL: &str = "recall";
pub const MEAN_PRECISION: &str = "precision";

/// Running aggregate of batch statistics plus a confusion histogram.
///
/// Scalars passed to [`ClassMetric::add`] are averaged over every batch seen
/// so far; arrays are replaced by the latest batch.
#[derive(Debug, Clone)]
pub struct ClassMetric {
    n_classes: usize,
    /// Rows are true classes, columns predicted classes.
    hist: Array2<u64>,
    sums: BTreeMap<String, f64>,
    counts: BTreeMap<String, usize>,
}

impl ClassMetric {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            hist: Array2::zeros((n_classes, n_classes)),
            sums: BTreeMap::new(),
            counts: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, stats: Stats) -> Stats {
        stats
            .into_iter()
            .map(|(key, value)| match value {
                StatValue::Scalar(v) => {
                    let sum = self.sums.entry(key.clone()).or_insert(0.0);
                    *sum += v;
                    let count = self.counts.entry(key.clone()).or_insert(0);
                    *count += 1;
                    let mean = *sum / *count as f64;
                    (key, StatValue::Scalar(mean))
                }
                array => (key, array),
            })
            .collect()
    }

    /// Folds one batch of labels into the histogram and returns the overall
    /// accuracy so far.
    pub fn update_confmat(&mut self, y_true: &[i64], y_pred: &[i64]) -> Result<f64> {
        for (&t, &p) in y_true.iter().zip(y_pred) {
            let t = self.class_index(t)?;
            let p = self.class_index(p)?;
            self.hist[[t, p]] += 1;
        }
        Ok(self.accuracy())
    }

    fn class_index(&self, label: i64) -> Result<usize> {
        if label < 0 || label as usize >= self.n_classes {
            return Err(TrainerError::LabelOutOfRange {
                label,
                n_classes: self.n_classes,
            });
        }
        Ok(label as usize)
    }

    pub fn hist(&self) -> &Array2<u64> {
        &self.hist
    }

    pub fn hist_array(&self) -> ArrayD<f64> {
        self.hist.mapv(|c| c as f64).into_dyn()
    }

    fn total(&self) -> f64 {
        self.hist.sum() as f64
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0.0 {
            return 0.0;
        }
        self.hist.diag().sum() as f64 / total
    }

    /// Per-class recall; classes without samples score 0.
    pub fn recall(&self) -> Array1<f64> {
        let support = self.hist.sum_axis(ndarray::Axis(1));
        Array1::from_iter((0..self.n_classes).map(|c| ratio(self.hist[[c, c]], support[c])))
    }

    /// Per-class precision; classes never predicted score 0.
    pub fn precision(&self) -> Array1<f64> {
        let predicted = self.hist.sum_axis(ndarray::Axis(0));
        Array1::from_iter((0..self.n_classes).map(|c| ratio(self.hist[[c, c]], predicted[c])))
    }

    /// Cohen's kappa of the histogram.
    pub fn kappa(&self) -> f64 {
        let total = self.total();
        if total == 0.0 {
            return 0.0;
        }
        let rows = self.hist.sum_axis(ndarray::Axis(1));
        let cols = self.hist.sum_axis(ndarray::Axis(0));
        let observed = self.accuracy();
        let expected: f64 = rows
            .iter()
            .zip(cols.iter())
            .map(|(&r, &c)| r as f64 * c as f64)
            .sum::<f64>()
            / (total * total);
        if (1.0 - expected).abs() < f64::EPSILON {
            return if observed >= 1.0 { 1.0 } else { 0.0 };
        }
        (observed - expected) / (1.0 - expected)
    }

    /// Histogram-derived scores attached to evaluation stats.
    pub fn summary(&self) -> Stats {
        let mut stats = Stats::new();
        stats.insert(KAPPA, self.kappa());
        stats.insert(MEAN_RECALL, self.recall().mean().unwrap_or(0.0));
        stats.insert(MEAN_PRECISION, self.precision().mean().unwrap_or(0.0));
        stats
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
