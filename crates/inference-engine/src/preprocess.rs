//! Image preprocessing into model input tensors

use crate::PreprocessError;
use image::imageops::FilterType;
use ndarray::Array4;
use std::path::Path;
use tracing::debug;

/// Square edge length the classifier was trained on
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Model input tensor, NHWC layout (1, size, size, 3), RGB, values in 0..=255
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Array4<f32>,
}

impl ImageTensor {
    /// Tensor dimensions as (batch, height, width, channels)
    pub fn shape(&self) -> [usize; 4] {
        let dims = self.data.shape();
        [dims[0], dims[1], dims[2], dims[3]]
    }

    /// Borrow the underlying array
    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }
}

/// Converts arbitrary encoded images into fixed-shape tensors.
///
/// Resizing uses a bilinear (triangle) filter. The model weights expect
/// raw 0-255 channel values, so no scaling is applied after the resize.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    size: u32,
}

impl ImagePreprocessor {
    /// Create a preprocessor producing `size` x `size` tensors
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Decode, convert to RGB, resize and lay out as a float tensor
    pub fn preprocess(&self, bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| PreprocessError::DecodeFailed(e.to_string()))?;

        debug!(
            "Decoded {}x{} image ({:?})",
            img.width(),
            img.height(),
            img.color()
        );

        // Alpha is dropped, not composited
        let rgb = img.to_rgb8();
        let resized = image::imageops::resize(&rgb, self.size, self.size, FilterType::Triangle);

        let edge = self.size as usize;
        let values: Vec<f32> = resized.into_raw().into_iter().map(f32::from).collect();
        let data = Array4::from_shape_vec((1, edge, edge, 3), values)
            .map_err(|e| PreprocessError::TensorShape(e.to_string()))?;

        Ok(ImageTensor { data })
    }

    /// Read an image file from disk and preprocess it
    pub fn preprocess_file(&self, path: &Path) -> Result<ImageTensor, PreprocessError> {
        let bytes = std::fs::read(path)
            .map_err(|e| PreprocessError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        self.preprocess(&bytes)
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_SIZE)
    }
}
