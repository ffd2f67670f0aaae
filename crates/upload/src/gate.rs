//! Request gate for inbound uploads

use crate::error::Rejection;
use bytes::Bytes;
use std::future::Future;
use std::io::{self, Cursor};
use tracing::debug;

/// Upload ceiling: 10 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Incrementally readable upload body
pub trait ChunkSource: Send {
    /// Next chunk of the body, `None` once exhausted
    fn next_chunk(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;
}

/// Upload as received from the client, body not yet read
#[derive(Debug)]
pub struct UploadRequest<S> {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub body: S,
}

/// Upload that passed the gate, body rewound to the start
#[derive(Debug)]
pub struct AcceptedUpload {
    file_name: String,
    content_type: String,
    body: Cursor<Vec<u8>>,
}

impl AcceptedUpload {
    /// Client-supplied file name
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Declared content type
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.get_ref().len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.body.get_ref().is_empty()
    }

    /// Readable body positioned at byte 0
    pub fn body_mut(&mut self) -> &mut Cursor<Vec<u8>> {
        &mut self.body
    }
}

/// Counts body bytes as they stream in and trips once the limit is crossed.
///
/// At most `limit` bytes are ever held.
#[derive(Debug)]
pub struct UploadCounter {
    limit: usize,
    received: Vec<u8>,
}

impl UploadCounter {
    /// Create a counter with the given ceiling
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            received: Vec::new(),
        }
    }

    /// Account for one chunk
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), Rejection> {
        if self.received.len() + chunk.len() > self.limit {
            return Err(Rejection::TooLarge { limit: self.limit });
        }
        self.received.extend_from_slice(chunk);
        Ok(())
    }

    /// Bytes accepted so far
    pub fn count(&self) -> usize {
        self.received.len()
    }

    /// Hand back the body with the cursor at the start
    pub fn finish(self) -> Cursor<Vec<u8>> {
        Cursor::new(self.received)
    }
}

/// Validates uploads before they reach the prediction path
#[derive(Debug, Clone)]
pub struct RequestGate {
    max_upload_bytes: usize,
}

impl RequestGate {
    /// Create a gate with the given size ceiling
    pub fn new(max_upload_bytes: usize) -> Self {
        Self { max_upload_bytes }
    }

    /// Size ceiling in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Check file name presence and content type prefix
    pub fn check_metadata(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<(), Rejection> {
        match file_name {
            Some(name) if !name.is_empty() => {}
            _ => return Err(Rejection::NoFile),
        }

        match content_type {
            Some(ct) if ct.starts_with("image/") => Ok(()),
            Some(ct) => Err(Rejection::BadContentType(ct.to_string())),
            None => Err(Rejection::BadContentType(String::new())),
        }
    }

    /// Fresh byte counter bound to this gate's ceiling
    pub fn counter(&self) -> UploadCounter {
        UploadCounter::new(self.max_upload_bytes)
    }

    /// Run every check, streaming the body through the size counter
    pub async fn validate<S: ChunkSource>(
        &self,
        upload: UploadRequest<S>,
    ) -> Result<AcceptedUpload, Rejection> {
        let UploadRequest {
            file_name,
            content_type,
            mut body,
        } = upload;

        self.check_metadata(file_name.as_deref(), content_type.as_deref())?;

        let mut counter = self.counter();
        while let Some(chunk) = body
            .next_chunk()
            .await
            .map_err(|e| Rejection::Io(e.to_string()))?
        {
            counter.push(&chunk)?;
        }

        debug!("Upload accepted: {} bytes", counter.count());

        Ok(AcceptedUpload {
            file_name: file_name.unwrap_or_default(),
            content_type: content_type.unwrap_or_default(),
            body: counter.finish(),
        })
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_BYTES)
    }
}
