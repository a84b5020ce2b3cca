use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tch::Tensor;

use crate::error::{Result, TrainerError};
use crate::model::{BatchResult, EarlyClassifier};
use crate::phase::Phase;

/// Loss strategy of a run. Two-phase modes train with cross-entropy during
/// the classification phase and switch to their earliness loss afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LossMode {
    EarlyReward,
    CrossEntropy,
    TwophaseEarlyReward,
    TwophaseLinearLoss,
    TwophaseCrossEntropy,
}

impl LossMode {
    pub const ALL: [LossMode; 5] = [
        LossMode::EarlyReward,
        LossMode::CrossEntropy,
        LossMode::TwophaseEarlyReward,
        LossMode::TwophaseLinearLoss,
        LossMode::TwophaseCrossEntropy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LossMode::EarlyReward => "early_reward",
            LossMode::CrossEntropy => "loss_cross_entropy",
            LossMode::TwophaseEarlyReward => "twophase_early_reward",
            LossMode::TwophaseLinearLoss => "twophase_linear_loss",
            LossMode::TwophaseCrossEntropy => "twophase_cross_entropy",
        }
    }

    /// Loss to evaluate in `phase`. Without a phase, plain cross-entropy.
    pub fn select(&self, phase: Option<Phase>, factors: LossFactors) -> LossFn {
        let Some(phase) = phase else {
            return LossFn::CrossEntropy;
        };
        let alpha = factors.earliness_factor;
        let entropy_factor = factors.entropy_factor;

        match (self, phase) {
            (LossMode::CrossEntropy, _) => LossFn::CrossEntropy,
            (LossMode::EarlyReward, _) => LossFn::EarlyReward { earliness_factor: alpha },
            (
                LossMode::TwophaseEarlyReward
                | LossMode::TwophaseLinearLoss
                | LossMode::TwophaseCrossEntropy,
                Phase::Classification,
            ) => LossFn::CrossEntropy,
            (LossMode::TwophaseEarlyReward, Phase::Earliness) => LossFn::EarlySimple { alpha },
            (LossMode::TwophaseLinearLoss, Phase::Earliness) => {
                LossFn::EarlyLinear { alpha, entropy_factor }
            }
            (LossMode::TwophaseCrossEntropy, Phase::Earliness) => {
                LossFn::EarlyCrossEntropy { alpha, entropy_factor }
            }
        }
    }

    fn expected() -> String {
        Self::ALL
            .iter()
            .map(|m| format!("'{}'", m.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for LossMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossMode {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| TrainerError::InvalidConfiguration {
                field: "loss_mode",
                value: s.to_string(),
                expected: Self::expected(),
            })
    }
}

impl TryFrom<String> for LossMode {
    type Error = TrainerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<LossMode> for String {
    fn from(mode: LossMode) -> Self {
        mode.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossFactors {
    pub earliness_factor: f64,
    pub entropy_factor: f64,
}

/// A concrete model loss with its parameters bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossFn {
    CrossEntropy,
    EarlyReward { earliness_factor: f64 },
    EarlySimple { alpha: f64 },
    EarlyLinear { alpha: f64, entropy_factor: f64 },
    EarlyCrossEntropy { alpha: f64, entropy_factor: f64 },
}

impl LossFn {
    pub fn compute<M>(&self, model: &M, inputs: &Tensor, targets: &Tensor) -> Result<BatchResult>
    where
        M: EarlyClassifier + ?Sized,
    {
        match *self {
            LossFn::CrossEntropy => model.loss_cross_entropy(inputs, targets),
            LossFn::EarlyReward { earliness_factor } => {
                model.early_loss(inputs, targets, earliness_factor)
            }
            LossFn::EarlySimple { alpha } => model.early_loss_simple(inputs, targets, alpha),
            LossFn::EarlyLinear { alpha, entropy_factor } => {
                model.early_loss_linear(inputs, targets, alpha, entropy_factor)
            }
            LossFn::EarlyCrossEntropy { alpha, entropy_factor } => {
                model.early_loss_cross_entropy(inputs, targets, alpha, entropy_factor)
            }
        }
    }
}

/// Evaluates the loss `mode` prescribes for `phase` on one batch.
pub fn loss_criterion<M>(
    model: &M,
    mode: LossMode,
    phase: Option<Phase>,
    factors: LossFactors,
    inputs: &Tensor,
    targets: &Tensor,
) -> Result<BatchResult>
where
    M: EarlyClassifier + ?Sized,
{
    mode.select(phase, factors).compute(model, inputs, targets)
}
