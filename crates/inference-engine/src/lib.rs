//! Image Classification Inference Engine
//!
//! Turns an uploaded image into a "Human" / "AI" verdict:
//! - Deterministic preprocessing into a (1, 224, 224, 3) float tensor
//! - ONNX Runtime session lifecycle (load, run, release)
//! - Startup warmup against a fixture image
//! - Probability to class/confidence decision

mod engine;
mod predictor;
mod preprocess;
mod warmup;

pub use engine::{InferenceBackend, MockBackend, OnnxSession, SessionOptions};
pub use predictor::{decide, Classification, Label, PredictionService, DEFAULT_THRESHOLD};
pub use preprocess::{ImagePreprocessor, ImageTensor, DEFAULT_IMAGE_SIZE};
pub use warmup::{WarmupReport, WarmupSequencer, DEFAULT_WARMUP_ITERATIONS};

use std::path::PathBuf;
use thiserror::Error;

/// Errors while bringing the model up. Always fatal at startup.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Model artifact not found at {0}")]
    ArtifactMissing(PathBuf),
    #[error("Model artifact could not be loaded: {0}")]
    ArtifactUnreadable(String),
    #[error("Model input signature mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("Warmup failed: {0}")]
    WarmupFailed(String),
}

/// Errors turning image bytes into a tensor
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to read image: {0}")]
    ReadFailed(String),
    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),
    #[error("Tensor construction failed: {0}")]
    TensorShape(String),
}

/// Errors during a single model execution
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference failed: {0}")]
    EngineFailure(String),
    #[error("Model produced no output values")]
    EmptyOutput,
    #[error("Model produced a non-finite probability: {0}")]
    NonFiniteOutput(f32),
}

/// Terminal failure of one prediction request
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Prediction failed: {0}")]
    Inference(#[from] InferenceError),
}
