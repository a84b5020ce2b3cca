use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::stats::Stats;

pub const TRAIN_MODE: &str = "train";
pub const TEST_MODE: &str = "test";

/// Scalar values per mode, epoch and column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoggedSeries(BTreeMap<String, BTreeMap<usize, BTreeMap<String, f64>>>);

impl LoggedSeries {
    pub fn modes(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(String::as_str)
    }

    pub fn epochs(&self, mode: &str) -> Vec<usize> {
        self.0
            .get(mode)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, mode: &str, epoch: usize, column: &str) -> Option<f64> {
        self.0.get(mode)?.get(&epoch)?.get(column).copied()
    }

    /// `(epoch, value)` pairs of one column, ordered by epoch.
    pub fn series(&self, mode: &str, column: &str) -> Vec<(usize, f64)> {
        self.0
            .get(mode)
            .map(|rows| {
                rows.iter()
                    .filter_map(|(epoch, row)| row.get(column).map(|v| (*epoch, *v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn columns(&self, mode: &str) -> Vec<String> {
        let mut columns: Vec<String> = self
            .0
            .get(mode)
            .into_iter()
            .flat_map(|rows| rows.values().flat_map(|row| row.keys().cloned()))
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

/// Collects per-epoch scalars under the active mode.
#[derive(Debug, Clone)]
pub struct Logger {
    mode: String,
    data: LoggedSeries,
}

impl Logger {
    pub fn new(modes: &[&str]) -> Self {
        let data = modes
            .iter()
            .map(|m| (m.to_string(), BTreeMap::new()))
            .collect();
        Self {
            mode: modes.first().copied().unwrap_or(TRAIN_MODE).to_string(),
            data: LoggedSeries(data),
        }
    }

    pub fn set_mode(&mut self, mode: &str) {
        self.mode = mode.to_string();
    }

    /// Records the scalar entries of `stats`; arrays are not logged.
    pub fn log(&mut self, stats: &Stats, epoch: usize) {
        let row = self
            .data
            .0
            .entry(self.mode.clone())
            .or_default()
            .entry(epoch)
            .or_default();
        for (key, value) in stats.scalars() {
            row.insert(key.to_string(), value);
        }
    }

    pub fn resume(&mut self, data: LoggedSeries) {
        self.data = data;
    }

    pub fn get_data(&self) -> &LoggedSeries {
        &self.data
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(&[TRAIN_MODE, TEST_MODE])
    }
}

/// Writes one summary line per epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Printer;

impl Printer {
    pub fn print(&self, stats: &Stats, epoch: usize, prefix: &str) {
        info!("{}epoch {}: {}", prefix, epoch, Self::format(stats));
    }

    pub fn format(stats: &Stats) -> String {
        stats
            .scalars()
            .map(|(key, value)| format!("{key}={value:.4}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
