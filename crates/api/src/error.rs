//! Uniform error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use inference_engine::PredictError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use upload::{Rejection, UploadError};

/// The only error body the service ever returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: String,
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Build an error envelope
pub fn to_envelope(code: u16, message: &str, details: Option<String>) -> ErrorEnvelope {
    ErrorEnvelope {
        status: "error".to_string(),
        code,
        message: message.to_string(),
        details,
    }
}

/// Request failures as seen by clients. The display text is the envelope message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    NoFile,

    #[error("Invalid file type")]
    InvalidFileType(String),

    #[error("File too large")]
    FileTooLarge { limit: usize },

    #[error("File processing error")]
    UploadRead(String),

    #[error("Failed to process uploaded file")]
    TempWrite(String),

    #[error("Image analysis failed")]
    AnalysisFailed(String),

    #[error("Prediction error")]
    PredictionFault(String),

    #[error("Request timed out")]
    Timeout { after_ms: u64 },
}

impl ApiError {
    /// HTTP status for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFile | ApiError::InvalidFileType(_) | ApiError::FileTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::UploadRead(_) | ApiError::TempWrite(_) | ApiError::PredictionFault(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::AnalysisFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Human-readable hint or underlying cause
    pub fn details(&self) -> String {
        match self {
            ApiError::NoFile => "Please select an image file to analyze".to_string(),
            ApiError::InvalidFileType(_) => {
                "Please upload a valid image file (JPG, PNG, etc.)".to_string()
            }
            ApiError::FileTooLarge { limit } => format!(
                "Please upload an image smaller than {}MB",
                limit / (1024 * 1024)
            ),
            ApiError::UploadRead(cause)
            | ApiError::TempWrite(cause)
            | ApiError::AnalysisFailed(cause)
            | ApiError::PredictionFault(cause) => cause.clone(),
            ApiError::Timeout { after_ms } => format!("No result within {}ms", after_ms),
        }
    }

    /// Short label used in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NoFile => "no_file",
            ApiError::InvalidFileType(_) => "bad_content_type",
            ApiError::FileTooLarge { .. } => "too_large",
            ApiError::UploadRead(_) => "upload_read",
            ApiError::TempWrite(_) => "temp_write",
            ApiError::AnalysisFailed(_) => "analysis_failed",
            ApiError::PredictionFault(_) => "prediction_fault",
            ApiError::Timeout { .. } => "timeout",
        }
    }

    /// Render as the external error shape
    pub fn envelope(&self) -> ErrorEnvelope {
        to_envelope(self.status().as_u16(), &self.to_string(), Some(self.details()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{} ({}): {}", self, status.as_u16(), self.details());
        }
        (status, Json(self.envelope())).into_response()
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NoFile => ApiError::NoFile,
            Rejection::BadContentType(ct) => ApiError::InvalidFileType(ct),
            Rejection::TooLarge { limit } => ApiError::FileTooLarge { limit },
            Rejection::Io(cause) => ApiError::UploadRead(cause),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::TempWrite(err.to_string())
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        ApiError::AnalysisFailed(err.to_string())
    }
}
