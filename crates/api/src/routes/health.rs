//! Health and Metrics Routes

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub model: ModelInfo,
    pub warmup: WarmupInfo,
}

/// Loaded model summary
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub input_name: String,
    pub input_shape: Vec<i64>,
    pub threshold: f32,
}

/// Startup warmup summary
#[derive(Debug, Serialize)]
pub struct WarmupInfo {
    pub iterations: usize,
    pub total_ms: f64,
}

/// Readiness: the router only exists once warmup succeeded
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let backend = state.service.backend();

    Json(HealthResponse {
        status: "ready".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        model: ModelInfo {
            input_name: backend.input_name().to_string(),
            input_shape: backend.input_shape().to_vec(),
            threshold: state.service.threshold(),
        },
        warmup: WarmupInfo {
            iterations: state.warmup.iterations,
            total_ms: state.warmup.total_ms(),
        },
    })
}

/// Prometheus exposition, 404 when metrics are disabled
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
