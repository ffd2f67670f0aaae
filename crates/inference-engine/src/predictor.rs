//! Prediction service and decision rule

use crate::engine::InferenceBackend;
use crate::preprocess::{ImagePreprocessor, ImageTensor};
use crate::{InferenceError, PredictError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Probability above which an image is labelled AI-generated
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Predicted origin of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Made by a person
    Human,
    /// Generated by a model
    #[serde(rename = "AI")]
    Ai,
}

impl Label {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Human => "Human",
            Label::Ai => "AI",
        }
    }
}

/// Winning class and its confidence as a percentage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub class: Label,
    /// Probability of `class`, in percent, rounded to two decimals
    pub confidence: f64,
}

/// Map the model's AI probability to a class.
///
/// `p == threshold` resolves to Human.
pub fn decide(p: f32, threshold: f32) -> Classification {
    let p = f64::from(p);

    if p > f64::from(threshold) {
        Classification {
            class: Label::Ai,
            confidence: round_percent(p),
        }
    } else {
        Classification {
            class: Label::Human,
            confidence: round_percent(1.0 - p),
        }
    }
}

fn round_percent(p: f64) -> f64 {
    (p * 100.0 * 100.0).round() / 100.0
}

/// Preprocess, run the model, apply the threshold
pub struct PredictionService {
    preprocessor: ImagePreprocessor,
    backend: Arc<dyn InferenceBackend>,
    threshold: f32,
}

impl PredictionService {
    /// Create a service over a loaded backend with the default threshold
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            preprocessor: ImagePreprocessor::default(),
            backend,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Override the decision threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Classify the image stored at `path`
    pub fn predict(&self, path: &Path) -> Result<Classification, PredictError> {
        let tensor = self.preprocessor.preprocess_file(path)?;
        Ok(self.classify(&tensor)?)
    }

    /// Classify an in-memory encoded image
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Classification, PredictError> {
        let tensor = self.preprocessor.preprocess(bytes)?;
        Ok(self.classify(&tensor)?)
    }

    /// Run the model on a prepared tensor and apply the threshold
    pub fn classify(&self, tensor: &ImageTensor) -> Result<Classification, InferenceError> {
        let start = Instant::now();
        let p = self.probability(tensor)?;
        let result = decide(p, self.threshold);

        debug!(
            "Prediction: {} (p={:.4}, conf={:.2}, latency={}ms)",
            result.class.as_str(),
            p,
            result.confidence,
            start.elapsed().as_millis()
        );

        Ok(result)
    }

    /// Raw AI probability: first element of the first output
    pub fn probability(&self, tensor: &ImageTensor) -> Result<f32, InferenceError> {
        let output = self.backend.run(tensor)?;
        let p = *output.first().ok_or(InferenceError::EmptyOutput)?;

        if !p.is_finite() {
            return Err(InferenceError::NonFiniteOutput(p));
        }

        Ok(p)
    }

    /// The loaded model
    pub fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }

    /// The preprocessing stage
    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    /// Current decision threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockBackend;
    use crate::PreprocessError;
    use proptest::prelude::*;

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            40,
            30,
            image::Rgb([200, 10, 90]),
        ));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    struct FixedOutput(Vec<f32>);

    impl InferenceBackend for FixedOutput {
        fn input_name(&self) -> &str {
            "fixed"
        }

        fn input_shape(&self) -> &[i64] {
            &[1, 224, 224, 3]
        }

        fn run(&self, _tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_boundary_is_human() {
        let result = decide(0.5, 0.5);
        assert_eq!(result.class, Label::Human);
        assert_eq!(result.confidence, 50.0);
    }

    #[test]
    fn test_confidence_of_winning_class() {
        let ai = decide(0.8731, 0.5);
        assert_eq!(ai.class, Label::Ai);
        assert_eq!(ai.confidence, 87.31);

        let human = decide(0.1, 0.5);
        assert_eq!(human.class, Label::Human);
        assert_eq!(human.confidence, 90.0);
    }

    #[test]
    fn test_custom_threshold() {
        assert_eq!(decide(0.6, 0.7).class, Label::Human);
        assert_eq!(decide(0.71, 0.7).class, Label::Ai);
    }

    #[test]
    fn test_label_serialization() {
        assert_eq!(serde_json::to_string(&Label::Ai).unwrap(), "\"AI\"");
        assert_eq!(serde_json::to_string(&Label::Human).unwrap(), "\"Human\"");
    }

    #[test]
    fn test_predict_bytes() {
        let service = PredictionService::new(Arc::new(MockBackend::new(0.92)));
        let result = service.predict_bytes(&png_bytes()).unwrap();
        assert_eq!(result.class, Label::Ai);
        assert_eq!(result.confidence, 92.0);
    }

    #[test]
    fn test_predict_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.png");
        std::fs::write(&path, png_bytes()).unwrap();

        let service = PredictionService::new(Arc::new(MockBackend::new(0.33)));
        let first = service.predict(&path).unwrap();
        let second = service.predict(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.class, Label::Human);
        assert_eq!(first.confidence, 67.0);
    }

    #[test]
    fn test_bad_image_skips_model() {
        let backend = Arc::new(MockBackend::new(0.9));
        let service = PredictionService::new(backend.clone());

        let err = service.predict_bytes(b"\xFF\xD8\xFF\xE0 truncated").unwrap_err();
        assert!(matches!(err, PredictError::Preprocess(PreprocessError::DecodeFailed(_))));
        assert_eq!(backend.runs(), 0);
    }

    #[test]
    fn test_engine_failure_is_reported() {
        let service = PredictionService::new(Arc::new(MockBackend::failing("bad kernel")));
        let err = service.predict_bytes(&png_bytes()).unwrap_err();
        assert!(matches!(err, PredictError::Inference(InferenceError::EngineFailure(_))));
    }

    #[test]
    fn test_empty_and_nan_outputs() {
        let service = PredictionService::new(Arc::new(FixedOutput(vec![])));
        assert!(matches!(
            service.predict_bytes(&png_bytes()),
            Err(PredictError::Inference(InferenceError::EmptyOutput))
        ));

        let service = PredictionService::new(Arc::new(FixedOutput(vec![f32::NAN, 0.2])));
        assert!(matches!(
            service.predict_bytes(&png_bytes()),
            Err(PredictError::Inference(InferenceError::NonFiniteOutput(_)))
        ));
    }

    proptest! {
        #[test]
        fn prop_decision_rule(p in 0.0f32..=1.0f32) {
            let result = decide(p, DEFAULT_THRESHOLD);
            let p64 = f64::from(p);

            if p > 0.5 {
                prop_assert_eq!(result.class, Label::Ai);
                prop_assert_eq!(result.confidence, (p64 * 100.0 * 100.0).round() / 100.0);
            } else {
                prop_assert_eq!(result.class, Label::Human);
                prop_assert_eq!(result.confidence, ((1.0 - p64) * 100.0 * 100.0).round() / 100.0);
            }
            prop_assert!(result.confidence >= 50.0 && result.confidence <= 100.0);
        }
    }
}
