use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("invalid configuration: unknown {field} '{value}', expected one of: {expected}")]
    InvalidConfiguration {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("optimizer state does not fit: {0}")]
    OptimizerState(String),

    #[error("label {label} outside of 0..{n_classes}")]
    LabelOutOfRange { label: i64, n_classes: usize },

    #[error("tensor error: {0}")]
    Tensor(#[from] tch::TchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TrainerError>;
