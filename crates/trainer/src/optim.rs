use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tch::{nn, Tensor};

use crate::error::{Result, TrainerError};

/// Parameter update rule driven by the trainer once per training batch.
///
/// Its state is persisted opaquely inside checkpoints.
pub trait Optimizer {
    fn zero_grad(&mut self);

    /// Applies accumulated gradients.
    fn step(&mut self) -> Result<()>;

    fn state_dict(&self) -> Result<serde_json::Value>;

    fn load_state_dict(&mut self, state: &serde_json::Value) -> Result<()>;
}

/// Moment buffers of one variable, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Moments {
    shape: Vec<i64>,
    exp_avg: Vec<f64>,
    exp_avg_sq: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AdamState {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    steps: u64,
    moments: BTreeMap<String, Moments>,
}

struct Param {
    name: String,
    value: Tensor,
    exp_avg: Tensor,
    exp_avg_sq: Tensor,
}

/// Adam over every trainable variable of a `VarStore`.
///
/// m_t = β1 m_{t-1} + (1 - β1) g, v_t = β2 v_{t-1} + (1 - β2) g²,
/// θ_t = θ_{t-1} - lr √(1 - β2^t) / (1 - β1^t) · m_t / (√v_t + ε)
pub struct AdamOptimizer {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    steps: u64,
    params: Vec<Param>,
}

impl AdamOptimizer {
    pub fn new(vs: &nn::VarStore, learning_rate: f64) -> Result<Self> {
        Self::with_betas(vs, learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(
        vs: &nn::VarStore,
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    ) -> Result<Self> {
        let mut variables: Vec<(String, Tensor)> = vs
            .variables()
            .into_iter()
            .filter(|(_, value)| value.requires_grad())
            .collect();
        variables.sort_by(|a, b| a.0.cmp(&b.0));

        let params = variables
            .into_iter()
            .map(|(name, value)| {
                let exp_avg = value.f_zeros_like()?;
                let exp_avg_sq = value.f_zeros_like()?;
                Ok(Param {
                    name,
                    value,
                    exp_avg,
                    exp_avg_sq,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            steps: 0,
            params,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl Optimizer for AdamOptimizer {
    fn zero_grad(&mut self) {
        for param in self.params.iter_mut() {
            param.value.zero_grad();
        }
    }

    fn step(&mut self) -> Result<()> {
        let _guard = tch::no_grad_guard();
        self.steps += 1;

        let t = self.steps as i32;
        let lr_t =
            self.learning_rate * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));

        for param in self.params.iter_mut() {
            let grad = param.value.grad();
            if !grad.defined() {
                continue;
            }
            param.exp_avg = &param.exp_avg * self.beta1 + &grad * (1.0 - self.beta1);
            param.exp_avg_sq = &param.exp_avg_sq * self.beta2 + grad.square() * (1.0 - self.beta2);

            let update = &param.exp_avg / (param.exp_avg_sq.sqrt() + self.epsilon) * lr_t;
            param.value.f_sub_(&update)?;
        }
        Ok(())
    }

    fn state_dict(&self) -> Result<serde_json::Value> {
        let mut moments = BTreeMap::new();
        for param in &self.params {
            moments.insert(
                param.name.clone(),
                Moments {
                    shape: param.value.size(),
                    exp_avg: flatten(&param.exp_avg)?,
                    exp_avg_sq: flatten(&param.exp_avg_sq)?,
                },
            );
        }
        let state = AdamState {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            steps: self.steps,
            moments,
        };
        Ok(serde_json::to_value(state)?)
    }

    /// Restores hyperparameters, step count and moments. Every variable of
    /// the store must be present in `state` with a matching shape.
    fn load_state_dict(&mut self, state: &serde_json::Value) -> Result<()> {
        let mut state: AdamState = serde_json::from_value(state.clone())?;
        if state.moments.len() != self.params.len() {
            return Err(TrainerError::OptimizerState(format!(
                "state holds {} variables, optimizer has {}",
                state.moments.len(),
                self.params.len()
            )));
        }

        let mut restored = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let moments = state.moments.remove(&param.name).ok_or_else(|| {
                TrainerError::OptimizerState(format!("no moments for variable '{}'", param.name))
            })?;
            if moments.shape != param.value.size() {
                return Err(TrainerError::OptimizerState(format!(
                    "variable '{}' has shape {:?}, state has {:?}",
                    param.name,
                    param.value.size(),
                    moments.shape
                )));
            }
            restored.push((
                unflatten(&moments.exp_avg, &moments.shape, &param.value)?,
                unflatten(&moments.exp_avg_sq, &moments.shape, &param.value)?,
            ));
        }

        for (param, (exp_avg, exp_avg_sq)) in self.params.iter_mut().zip(restored) {
            param.exp_avg = exp_avg;
            param.exp_avg_sq = exp_avg_sq;
        }
        self.learning_rate = state.learning_rate;
        self.beta1 = state.beta1;
        self.beta2 = state.beta2;
        self.epsilon = state.epsilon;
        self.steps = state.steps;
        Ok(())
    }
}

fn flatten(tensor: &Tensor) -> Result<Vec<f64>> {
    let flat = tensor.f_reshape([-1])?.f_to_kind(tch::Kind::Double)?;
    Ok(Vec::<f64>::try_from(&flat)?)
}

fn unflatten(data: &[f64], shape: &[i64], like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::f_from_slice(data)?
        .f_reshape(shape)?
        .f_to_kind(like.kind())?
        .f_to_device(like.device())?)
}
