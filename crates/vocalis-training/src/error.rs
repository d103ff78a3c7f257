use crate::pipeline::UnitState;
use crate::stage::StageKind;
use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid hyperparameter `{key}`: {value:?} is not a valid {expected}")]
    Parameter { key: String, value: String, expected: &'static str },

    #[error("failed to read hyperparameter file {path}: {message}")]
    HyperparameterFile { path: PathBuf, message: String },

    #[error("failed to load baseline config {path}: {message}")]
    ConfigLoad { path: PathBuf, message: String },

    #[error("failed to enumerate training units in {path}: {message}")]
    Discovery { path: PathBuf, message: String },

    #[error("invalid training unit name: {0:?}")]
    InvalidUnit(String),

    #[error("stage `{stage}` failed for unit `{unit}`: {message}")]
    StageFailure { unit: String, stage: StageKind, message: String },

    #[error("preprocessing failed for unit `{unit}`: {message}")]
    PreprocessingFailure { unit: String, message: String },

    /// A local step (dataset dirs, config write) failed while `unit` was in `step`.
    #[error("{step} failed for unit `{unit}`: {source}")]
    UnitStep { unit: String, step: UnitState, source: Box<PipelineError> },

    #[error("settings error: {0}")]
    Settings(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Attribute `source` to `unit` at `step`.
    #[must_use]
    pub fn unit_step(unit: &str, step: UnitState, source: Self) -> Self {
        Self::UnitStep { unit: unit.to_string(), step, source: Box::new(source) }
    }

    /// Name of the unit this error is attributed to, if any.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::StageFailure { unit, .. } | Self::PreprocessingFailure { unit, .. } | Self::UnitStep { unit, .. } => {
                Some(unit)
            }
            _ => None,
        }
    }
}
