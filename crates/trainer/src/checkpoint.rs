use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use tch::nn;

use crate::error::Result;
use crate::logger::LoggedSeries;

/// Training state stored next to the model weights at a phase boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub epoch: usize,
    pub optimizer_state: serde_json::Value,
    pub logged_data: LoggedSeries,
}

/// Sidecar file holding the snapshot of the weights at `path`.
pub fn metadata_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, snapshot)?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Saves the variables of `vs` to `path` and the snapshot to its sidecar.
pub fn save_var_store(vs: &nn::VarStore, path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    vs.save(path)?;
    write_snapshot(&metadata_path(path), snapshot)?;
    info!("Saved weights to {:?} at epoch {}", path, snapshot.epoch);
    Ok(())
}

pub fn load_var_store(vs: &mut nn::VarStore, path: &Path) -> Result<Snapshot> {
    vs.load(path)?;
    let snapshot = read_snapshot(&metadata_path(path))?;
    info!("Loaded weights from {:?} at epoch {}", path, snapshot.epoch);
    Ok(snapshot)
}
