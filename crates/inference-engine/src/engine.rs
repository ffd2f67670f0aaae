//! Model session management

use crate::preprocess::{ImageTensor, DEFAULT_IMAGE_SIZE};
use crate::{InferenceError, InitError};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, error, info, warn};

/// A loaded model that can score one preprocessed image at a time.
///
/// Implementations must tolerate concurrent `run` calls from many requests.
pub trait InferenceBackend: Send + Sync {
    /// Name of the model input slot
    fn input_name(&self) -> &str;

    /// Declared input shape, `-1` for dynamic dimensions
    fn input_shape(&self) -> &[i64];

    /// Execute the model and return the flattened first output
    fn run(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError>;

    /// Give back engine scratch memory once warmup is done
    fn release_scratch(&self) {}
}

/// Session tuning knobs. None of these change numeric output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Enable all graph-level optimizations
    pub optimize_graph: bool,
    /// Reuse memory allocation patterns across runs
    pub memory_pattern: bool,
    /// Use the CPU arena allocator
    pub cpu_arena: bool,
    /// Intra-op thread count (runtime default when unset)
    pub intra_threads: Option<usize>,
    /// Number of sessions loaded for concurrent requests
    pub pool_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            optimize_graph: true,
            memory_pattern: true,
            cpu_arena: true,
            intra_threads: None,
            pool_size: 1,
        }
    }
}

/// ONNX Runtime backed model, holding a small pool of sessions
pub struct OnnxSession {
    sessions: Vec<Mutex<Session>>,
    next: AtomicUsize,
    input_name: String,
    input_shape: Vec<i64>,
}

impl OnnxSession {
    /// Load the model at `path` and check its input signature
    pub fn load(path: &Path, options: &SessionOptions) -> Result<Self, InitError> {
        if !path.is_file() {
            error!("Model artifact missing: {}", path.display());
            return Err(InitError::ArtifactMissing(path.to_path_buf()));
        }

        info!("Loading ONNX model from {}", path.display());

        let pool_size = options.pool_size.max(1);
        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            sessions.push(Self::build_session(path, options)?);
        }

        let (input_name, input_shape) = Self::resolve_input(&sessions[0])?;
        info!("Model input name: {}", input_name);
        info!("Model expects input shape: {:?}", input_shape);

        Ok(Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
            input_name,
            input_shape,
        })
    }

    fn build_session(path: &Path, options: &SessionOptions) -> Result<Session, InitError> {
        let level = if options.optimize_graph {
            GraphOptimizationLevel::Level3
        } else {
            GraphOptimizationLevel::Disable
        };

        let mut builder = Session::builder()
            .map_err(unreadable)?
            .with_optimization_level(level)
            .map_err(unreadable)?
            .with_memory_pattern(options.memory_pattern)
            .map_err(unreadable)?
            .with_execution_providers([CPUExecutionProvider::default()
                .with_arena_allocator(options.cpu_arena)
                .build()])
            .map_err(unreadable)?;

        if let Some(threads) = options.intra_threads {
            builder = builder.with_intra_threads(threads).map_err(unreadable)?;
        }

        builder.commit_from_file(path).map_err(unreadable)
    }

    fn resolve_input(session: &Session) -> Result<(String, Vec<i64>), InitError> {
        let expected = format!(
            "float32 [1, {size}, {size}, 3]",
            size = DEFAULT_IMAGE_SIZE
        );

        let input = session.inputs.first().ok_or_else(|| InitError::ShapeMismatch {
            expected: expected.clone(),
            actual: "no inputs".to_string(),
        })?;

        let (ty, dims) = match &input.input_type {
            ValueType::Tensor { ty, shape, .. } => (*ty, shape.iter().copied().collect::<Vec<i64>>()),
            other => {
                return Err(InitError::ShapeMismatch {
                    expected,
                    actual: format!("{:?}", other),
                })
            }
        };

        let wanted = [1, DEFAULT_IMAGE_SIZE as i64, DEFAULT_IMAGE_SIZE as i64, 3];
        let dims_ok = dims.len() == wanted.len()
            && dims.iter().zip(wanted.iter()).all(|(&d, &w)| d < 0 || d == w);

        if ty != TensorElementType::Float32 || !dims_ok {
            return Err(InitError::ShapeMismatch {
                expected,
                actual: format!("{:?} {:?}", ty, dims),
            });
        }

        Ok((input.name.clone(), dims))
    }

    /// Number of pooled sessions
    pub fn pool_size(&self) -> usize {
        self.sessions.len()
    }
}

impl Drop for OnnxSession {
    fn drop(&mut self) {
        info!("Releasing {} model session(s)", self.sessions.len());
    }
}

impl InferenceBackend for OnnxSession {
    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn run(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let input = Tensor::from_array(tensor.as_array().clone()).map_err(engine_failure)?;

        let mut session = acquire_slot(self.sessions.as_slice(), &self.next);
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(engine_failure)?;

        let (_, values) = outputs[0].try_extract_tensor::<f32>().map_err(engine_failure)?;
        debug!("Model returned {} value(s)", values.len());

        Ok(values.to_vec())
    }
}

/// Prefer an idle slot, otherwise wait on the round-robin pick.
///
/// A slot poisoned by a panicking run is recovered; sessions hold no
/// state that a failed run can leave half-written.
fn acquire_slot<'a, T>(slots: &'a [Mutex<T>], next: &AtomicUsize) -> MutexGuard<'a, T> {
    let start = next.fetch_add(1, Ordering::Relaxed) % slots.len();

    for offset in 0..slots.len() {
        let idx = (start + offset) % slots.len();
        match slots[idx].try_lock() {
            Ok(guard) => return guard,
            Err(TryLockError::WouldBlock) => continue,
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("Recovering model session {} after a panicked run", idx);
                return poisoned.into_inner();
            }
        }
    }

    slots[start].lock().unwrap_or_else(PoisonError::into_inner)
}

fn unreadable<E: std::fmt::Display>(e: E) -> InitError {
    InitError::ArtifactUnreadable(e.to_string())
}

fn engine_failure<E: std::fmt::Display>(e: E) -> InferenceError {
    InferenceError::EngineFailure(e.to_string())
}

/// In-process stand-in for a real model, returning a fixed probability
pub struct MockBackend {
    probability: f32,
    failure: Option<String>,
    runs: AtomicUsize,
    input_shape: [i64; 4],
}

impl MockBackend {
    /// Mock that always scores `probability`
    pub fn new(probability: f32) -> Self {
        debug!("Creating mock inference backend (p={})", probability);
        Self {
            probability,
            failure: None,
            runs: AtomicUsize::new(0),
            input_shape: [1, DEFAULT_IMAGE_SIZE as i64, DEFAULT_IMAGE_SIZE as i64, 3],
        }
    }

    /// Mock whose every run fails with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(0.0)
        }
    }

    /// Number of completed or attempted runs
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for MockBackend {
    fn input_name(&self) -> &str {
        "mock_input"
    }

    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn run(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure {
            return Err(InferenceError::EngineFailure(message.clone()));
        }

        let expected = [1, DEFAULT_IMAGE_SIZE as usize, DEFAULT_IMAGE_SIZE as usize, 3];
        if tensor.shape() != expected {
            return Err(InferenceError::EngineFailure(format!(
                "unexpected input shape {:?}",
                tensor.shape()
            )));
        }

        Ok(vec![self.probability])
    }
}
