//! HTTP error envelope and the mapping from pipeline failures to error codes.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::{json, Value};
use shared::error::PipelineError;
use strum_macros::{AsRefStr, Display};
use tracing::error;

use crate::session::ContextError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    MissingAnonId,
    MissingContextId,
    InvalidContextId,
    InvalidLabels,
    InvalidAiLabels,
    InvalidAiSummary,
    InvalidAiHints,
    QuestionsAiParse,
    QuestionsAiFailed,
    FramingAiFailed,
    AnalysisAiFailed,
    ChatAiFailed,
    Canceled,
    RateLimited,
    InternalServerError,
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: ErrorCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope<'a> {
    is_success: bool,
    error: ErrorBody<'a>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::bad_request(ErrorCode::InvalidRequest, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Maps a pipeline failure to a response. `failed` is the step's generic
    /// code used when no more specific one applies.
    pub fn from_pipeline(err: PipelineError, failed: ErrorCode) -> Self {
        match err {
            PipelineError::Canceled => Self::new(
                StatusCode::CONFLICT,
                ErrorCode::Canceled,
                "superseded by a newer request",
            ),
            PipelineError::InvalidInputLabels => Self::bad_request(
                ErrorCode::InvalidLabels,
                "choice labels must describe the options, not just name a side",
            ),
            PipelineError::Config(msg) => {
                error!(%msg, "configuration error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::InternalServerError,
                    "internal server error",
                )
            }
            PipelineError::GenerationFailed { attempts, last } => {
                let code = code_for_cause(&last, failed);
                let log: Vec<Value> = attempts
                    .iter()
                    .map(|a| json!({ "strategy": a.strategy, "error": a.error }))
                    .collect();
                Self::new(StatusCode::BAD_GATEWAY, code, last.to_string())
                    .with_details(json!({ "attempts": log }))
            }
            other => {
                let code = code_for_cause(&other, failed);
                Self::new(StatusCode::BAD_GATEWAY, code, other.to_string())
            }
        }
    }
}

fn code_for_cause(cause: &PipelineError, failed: ErrorCode) -> ErrorCode {
    match cause.root_cause() {
        PipelineError::DegenerateOutput { field, .. } if field.ends_with("Label") => {
            ErrorCode::InvalidAiLabels
        }
        PipelineError::SchemaViolation { path, .. } => {
            if path == "summary" {
                ErrorCode::InvalidAiSummary
            } else if path == "aHint" || path == "bHint" {
                ErrorCode::InvalidAiHints
            } else if failed == ErrorCode::QuestionsAiFailed {
                ErrorCode::QuestionsAiParse
            } else {
                failed
            }
        }
        _ => failed,
    }
}

impl From<ContextError> for ApiError {
    fn from(err: ContextError) -> Self {
        let code = match err {
            ContextError::MissingAnonId => ErrorCode::MissingAnonId,
            ContextError::MissingSessionContext => ErrorCode::MissingContextId,
            ContextError::InvalidSessionContext => ErrorCode::InvalidContextId,
        };
        Self::bad_request(code, err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status).json(ErrorEnvelope {
            is_success: false,
            error: ErrorBody {
                code: self.code,
                message: &self.message,
                details: self.details.as_ref(),
            },
        })
    }
}
