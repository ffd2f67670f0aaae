//! Image Detector API Server
//!
//! Serves "Human" vs "AI" predictions for uploaded images. Startup is
//! strictly ordered: the model is loaded and warmed up before a listener
//! is bound.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use inference_engine::{
    InferenceBackend, InitError, OnnxSession, PredictionService,
    WarmupReport, WarmupSequencer,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use upload::{RequestGate, TempArtifactManager, UploadError};

pub mod config;
pub mod error;
pub mod routes;

pub use config::{ConfigError, LogFormat, ServiceConfig};
pub use error::{to_envelope, ApiError, ErrorEnvelope};

/// Errors that keep the service from starting
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("Temp directory unavailable: {0}")]
    TempDir(#[from] UploadError),
    #[error("Logging setup failed: {0}")]
    Logging(String),
    #[error("Metrics setup failed: {0}")]
    Metrics(String),
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state shared across handlers. Only constructed once the
/// model has been warmed up.
pub struct AppState {
    /// Preprocessing + model + decision
    pub service: Arc<PredictionService>,
    /// Upload validation
    pub gate: RequestGate,
    /// Temp file handling
    pub temp: TempArtifactManager,
    /// Effective configuration
    pub config: ServiceConfig,
    /// Startup warmup timings
    pub warmup: WarmupReport,
    /// Prometheus handle, when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
}

impl AppState {
    /// Warm up `backend` and assemble the state around it
    pub fn initialize(
        config: ServiceConfig,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let service = PredictionService::new(backend).with_threshold(config.decision_threshold);

        let warmup = WarmupSequencer::new(&config.warmup_fixture)
            .with_iterations(config.warmup_iterations)
            .run(&service)?;

        let temp = TempArtifactManager::new(&config.temp_dir);
        temp.ensure_dir()?;

        Ok(Self {
            service: Arc::new(service),
            gate: RequestGate::new(config.max_upload_bytes),
            temp,
            config,
            warmup,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        })
    }

    /// Attach a Prometheus handle for the /metrics route
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Load the ONNX model from the configured path and warm it up
pub fn bootstrap(config: ServiceConfig) -> Result<AppState, StartupError> {
    config.validate()?;
    let session = OnnxSession::load(&config.model_path, &config.session)?;
    info!("Loaded {} model session(s)", session.pool_size());
    AppState::initialize(config, Arc::new(session))
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // The upload gate enforces the size ceiling while streaming
    Router::new()
        .route(
            "/predict",
            post(routes::predict::predict).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/v1/health", get(routes::health::health))
        .route("/metrics", get(routes::health::metrics))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Initialize logging
pub fn init_logging(config: &ServiceConfig) -> Result<(), StartupError> {
    let level: Level = config
        .log_level
        .parse()
        .map_err(|_| StartupError::Logging(format!("unknown log level {}", config.log_level)))?;

    let result = match config.log_format {
        LogFormat::Plain => tracing::subscriber::set_global_default(
            FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(true)
                .finish(),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(true)
                .json()
                .finish(),
        ),
    };

    result.map_err(|e| StartupError::Logging(e.to_string()))
}

/// Bootstrap the model, then serve until Ctrl-C
pub async fn run_server(config: ServiceConfig) -> Result<(), StartupError> {
    let addr = config.bind_addr.clone();
    let metrics_enabled = config.metrics_enabled;

    let state = tokio::task::spawn_blocking(move || bootstrap(config))
        .await
        .map_err(|e| StartupError::Init(InitError::WarmupFailed(e.to_string())))??;

    let state = if metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| StartupError::Metrics(e.to_string()))?;
        state.with_metrics(handle)
    } else {
        state
    };

    let state = Arc::new(state);
    let app = create_router(state.clone());

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down application...");
    drop(state);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
