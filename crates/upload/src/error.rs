//! Upload Error Types

use thiserror::Error;

/// Reasons an upload is turned away before prediction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Missing file field or empty file name
    #[error("No file uploaded")]
    NoFile,

    /// Declared content type is not `image/*`
    #[error("Invalid content type: {0}")]
    BadContentType(String),

    /// Body grew past the configured ceiling
    #[error("Upload exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// Reading the upload stream failed
    #[error("Upload read failed: {0}")]
    Io(String),
}

/// Errors managing temporary upload files
#[derive(Debug, Error)]
pub enum UploadError {
    /// Could not create or write the temp file
    #[error("Failed to write temp file: {0}")]
    TempWrite(String),

    /// Could not remove the temp file
    #[error("Failed to remove temp file: {0}")]
    TempCleanup(String),
}
