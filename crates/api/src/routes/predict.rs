//! Prediction Route

use axum::{
    body::Bytes,
    extract::{multipart::Field, multipart::MultipartRejection, Multipart, State},
    response::{IntoResponse, Response},
    Json,
};
use inference_engine::{Classification, Label};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::debug;
use upload::{ChunkSource, UploadRequest};

use crate::error::ApiError;
use crate::AppState;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// Successful prediction body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub status: String,
    pub class: Label,
    pub confidence: f64,
}

impl From<Classification> for PredictionResponse {
    fn from(result: Classification) -> Self {
        Self {
            status: "success".to_string(),
            class: result.class,
            confidence: result.confidence,
        }
    }
}

/// Streams a multipart field through the upload gate
struct FieldBody<'a>(Field<'a>);

impl ChunkSource for FieldBody<'_> {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.0
            .chunk()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

/// Classify an uploaded image
pub async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let start = Instant::now();

    let outcome = match multipart {
        Ok(multipart) => {
            let deadline = state.config.request_timeout();
            match timeout(deadline, process(&state, multipart)).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout {
                    after_ms: state.config.request_timeout_ms,
                }),
            }
        }
        Err(rejection) => {
            debug!("Not a multipart upload: {}", rejection);
            Err(ApiError::NoFile)
        }
    };

    histogram!("prediction_latency_seconds").record(start.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => {
            counter!("predictions_total", "class" => result.class.as_str()).increment(1);
            Json(PredictionResponse::from(result)).into_response()
        }
        Err(err) => {
            counter!("prediction_errors_total", "kind" => err.kind()).increment(1);
            err.into_response()
        }
    }
}

async fn process(state: &AppState, mut multipart: Multipart) -> Result<Classification, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::UploadRead(e.to_string()))?
    {
        if field.name() == Some(FILE_FIELD) {
            return classify_field(state, field).await;
        }
    }

    Err(ApiError::NoFile)
}

async fn classify_field(state: &AppState, field: Field<'_>) -> Result<Classification, ApiError> {
    let upload = UploadRequest {
        file_name: field.file_name().map(str::to_string),
        content_type: field.content_type().map(str::to_string),
        body: FieldBody(field),
    };

    let mut accepted = state.gate.validate(upload).await?;
    debug!(
        "Received {} ({}, {} bytes)",
        accepted.file_name(),
        accepted.content_type(),
        accepted.len()
    );
    let artifact = state.temp.materialize(&mut accepted).await?;
    drop(accepted);

    let service = state.service.clone();
    let path = artifact.path().to_path_buf();
    let joined = tokio::task::spawn_blocking(move || service.predict(&path)).await;
    artifact.release();

    match joined {
        Ok(result) => Ok(result?),
        Err(fault) => Err(ApiError::PredictionFault(fault.to_string())),
    }
}
