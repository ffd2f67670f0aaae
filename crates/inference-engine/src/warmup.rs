//! Startup warmup

use crate::predictor::PredictionService;
use crate::InitError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Runs needed to absorb lazy kernel selection in the runtime
pub const DEFAULT_WARMUP_ITERATIONS: usize = 3;

/// Timings collected while warming up
#[derive(Debug, Clone, Serialize)]
pub struct WarmupReport {
    pub iterations: usize,
    /// Per-run latency in milliseconds
    pub latencies_ms: Vec<f64>,
}

impl WarmupReport {
    /// Sum of all run latencies
    pub fn total_ms(&self) -> f64 {
        self.latencies_ms.iter().sum()
    }
}

/// Forces the inference path to run against a fixture image before the
/// service accepts traffic
#[derive(Debug, Clone)]
pub struct WarmupSequencer {
    fixture: PathBuf,
    iterations: usize,
}

impl WarmupSequencer {
    /// Create a sequencer with the default iteration count
    pub fn new(fixture: impl Into<PathBuf>) -> Self {
        Self {
            fixture: fixture.into(),
            iterations: DEFAULT_WARMUP_ITERATIONS,
        }
    }

    /// Override the number of runs
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Fixture image location
    pub fn fixture(&self) -> &Path {
        &self.fixture
    }

    /// Preprocess the fixture once and run the model `iterations` times
    pub fn run(&self, service: &PredictionService) -> Result<WarmupReport, InitError> {
        info!("Starting model warmup with {}", self.fixture.display());

        let tensor = service
            .preprocessor()
            .preprocess_file(&self.fixture)
            .map_err(|e| {
                error!("Warmup fixture unusable: {}", e);
                InitError::WarmupFailed(e.to_string())
            })?;

        let mut latencies_ms = Vec::with_capacity(self.iterations);
        for i in 0..self.iterations {
            let start = Instant::now();
            service.probability(&tensor).map_err(|e| {
                error!("Warmup run {} failed: {}", i + 1, e);
                InitError::WarmupFailed(e.to_string())
            })?;
            let elapsed = start.elapsed();
            info!("Warmup prediction {}: {:.4} seconds", i + 1, elapsed.as_secs_f64());
            latencies_ms.push(as_millis(elapsed));
        }

        drop(tensor);
        service.backend().release_scratch();

        info!("Model warmup complete and ready for inference");
        Ok(WarmupReport {
            iterations: self.iterations,
            latencies_ms,
        })
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockBackend;
    use std::sync::Arc;

    fn write_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("about.png");
        image::RgbImage::from_pixel(300, 200, image::Rgb([5, 6, 7]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_runs_configured_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = write_fixture(dir.path());
        let backend = Arc::new(MockBackend::new(0.2));
        let service = PredictionService::new(backend.clone());

        let report = WarmupSequencer::new(&fixture).run(&service).unwrap();
        assert_eq!(report.iterations, DEFAULT_WARMUP_ITERATIONS);
        assert_eq!(report.latencies_ms.len(), 3);
        assert_eq!(backend.runs(), 3);

        let report = WarmupSequencer::new(&fixture)
            .with_iterations(5)
            .run(&service)
            .unwrap();
        assert_eq!(report.iterations, 5);
        assert_eq!(backend.runs(), 8);
    }

    #[test]
    fn test_missing_fixture_fails() {
        let backend = Arc::new(MockBackend::new(0.2));
        let service = PredictionService::new(backend.clone());

        let result = WarmupSequencer::new("/nonexistent/about.jpeg").run(&service);
        assert!(matches!(result, Err(InitError::WarmupFailed(_))));
        assert_eq!(backend.runs(), 0);
    }

    #[test]
    fn test_engine_failure_fails_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = write_fixture(dir.path());
        let service = PredictionService::new(Arc::new(MockBackend::failing("no kernel")));

        let result = WarmupSequencer::new(fixture).run(&service);
        assert!(matches!(result, Err(InitError::WarmupFailed(_))));
    }
}
