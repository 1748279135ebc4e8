use serde::Serialize;
use thiserror::Error;

use crate::generation::{GenerationAttempt, Strategy};
use crate::openai_client::BackendError;

/// Failure taxonomy of the structured-generation pipeline.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("backend unavailable during {strategy}: {cause}")]
    BackendUnavailable {
        strategy: Strategy,
        cause: BackendError,
    },
    #[error("no JSON value found in backend output")]
    NoJsonFound,
    #[error("schema violation at `{path}`: expected {expected}")]
    SchemaViolation { path: String, expected: String },
    #[error("degenerate value {value:?} for `{field}`")]
    DegenerateOutput { field: String, value: String },
    #[error("caller supplied degenerate labels")]
    InvalidInputLabels,
    #[error("generation failed after {} attempts: {last}", .attempts.len())]
    GenerationFailed {
        attempts: Vec<GenerationAttempt>,
        last: Box<PipelineError>,
    },
    #[error("generation canceled")]
    Canceled,
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn schema(path: impl Into<String>, expected: impl Into<String>) -> Self {
        PipelineError::SchemaViolation {
            path: path.into(),
            expected: expected.into(),
        }
    }

    pub fn degenerate(field: impl Into<String>, value: impl Into<String>) -> Self {
        PipelineError::DegenerateOutput {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Stable short name used in attempt logs and API error details.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::BackendUnavailable { .. } => "BackendUnavailable",
            PipelineError::NoJsonFound => "NoJsonFound",
            PipelineError::SchemaViolation { .. } => "SchemaViolation",
            PipelineError::DegenerateOutput { .. } => "DegenerateOutput",
            PipelineError::InvalidInputLabels => "InvalidInputLabels",
            PipelineError::GenerationFailed { .. } => "GenerationFailed",
            PipelineError::Canceled => "Canceled",
            PipelineError::Config(_) => "Config",
        }
    }

    /// The innermost concrete cause; unwraps `GenerationFailed`.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::GenerationFailed { last, .. } => last.root_cause(),
            other => other,
        }
    }

    pub fn info(&self) -> FailureInfo {
        FailureInfo {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(e: config::ConfigError) -> Self {
        PipelineError::Config(e.to_string())
    }
}

/// Serializable snapshot of a failure, stored in the attempt log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
}
