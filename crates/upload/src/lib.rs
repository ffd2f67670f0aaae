//! Upload Handling
//!
//! Gatekeeping and temporary storage for uploaded images:
//! - File name and content type checks
//! - Streaming size limit that aborts as soon as the ceiling is crossed
//! - Uniquely named temp files removed on every exit path

mod error;
mod gate;
mod temp;

pub use error::{Rejection, UploadError};
pub use gate::{
    AcceptedUpload, ChunkSource, RequestGate, UploadCounter, UploadRequest,
    DEFAULT_MAX_UPLOAD_BYTES,
};
pub use temp::{TempArtifact, TempArtifactManager};
