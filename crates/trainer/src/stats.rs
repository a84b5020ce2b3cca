use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use tch::{Device, Kind, Tensor};

use crate::error::Result;

pub const ACCURACY: &str = "accuracy";
pub const LOSS: &str = "loss";
pub const CONFUSION_MATRIX: &str = "confusion_matrix";
pub const TARGETS: &str = "targets";
pub const INPUTS: &str = "inputs";
pub const WEIGHTS: &str = "weights";
pub const PROBAS: &str = "probas";

#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Scalar(f64),
    Array(ArrayD<f64>),
}

impl StatValue {
    /// Single-element tensors become scalars, everything else a host array.
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        if tensor.numel() == 1 {
            let value = tensor.detach().to_device(Device::Cpu).reshape([-1]).f_double_value(&[0])?;
            Ok(StatValue::Scalar(value))
        } else {
            Ok(StatValue::Array(tensor_to_array(tensor)?))
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            StatValue::Scalar(v) => Some(*v),
            StatValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            StatValue::Array(a) => Some(a),
            StatValue::Scalar(_) => None,
        }
    }
}

impl From<f64> for StatValue {
    fn from(value: f64) -> Self {
        StatValue::Scalar(value)
    }
}

impl From<ArrayD<f64>> for StatValue {
    fn from(value: ArrayD<f64>) -> Self {
        StatValue::Array(value)
    }
}

/// Named statistics of a batch or an epoch, ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats(BTreeMap<String, StatValue>);

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<StatValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn insert_tensor(&mut self, key: impl Into<String>, tensor: &Tensor) -> Result<()> {
        self.0.insert(key.into(), StatValue::from_tensor(tensor)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&StatValue> {
        self.0.get(key)
    }

    pub fn scalar(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(StatValue::as_scalar)
    }

    pub fn array(&self, key: &str) -> Option<&ArrayD<f64>> {
        self.get(key).and_then(StatValue::as_array)
    }

    pub fn scalars(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_scalar().map(|s| (k.as_str(), s)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StatValue)> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, StatValue)> for Stats {
    fn from_iter<I: IntoIterator<Item = (String, StatValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Stats {
    type Item = (String, StatValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, StatValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Copies a tensor of any kind and device into a host `f64` array.
pub fn tensor_to_array(tensor: &Tensor) -> Result<ArrayD<f64>> {
    let host = tensor
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Double)
        .contiguous();
    let shape: Vec<usize> = host.size().iter().map(|&d| d as usize).collect();
    let data = Vec::<f64>::try_from(&host.reshape([-1]))?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}

/// Flattens an integer label tensor into host memory.
pub fn tensor_to_labels(tensor: &Tensor) -> Result<Vec<i64>> {
    let host = tensor.detach().to_device(Device::Cpu).to_kind(Kind::Int64);
    Ok(Vec::<i64>::try_from(&host.reshape([-1]))?)
}
