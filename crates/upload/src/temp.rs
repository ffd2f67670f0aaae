//! Request-scoped temporary files

use crate::error::UploadError;
use crate::gate::AcceptedUpload;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Creates uniquely named temp files for uploads
#[derive(Debug, Clone)]
pub struct TempArtifactManager {
    dir: PathBuf,
}

impl TempArtifactManager {
    /// Store artifacts under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the artifact directory if needed
    pub fn ensure_dir(&self) -> Result<(), UploadError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| UploadError::TempWrite(format!("{}: {}", self.dir.display(), e)))
    }

    /// Collision-resistant name: random token plus the client's base name
    pub fn artifact_name(file_name: &str) -> String {
        let base = file_name
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .unwrap_or("upload");
        format!("temp_{}_{}", Uuid::new_v4().simple(), base)
    }

    /// Copy the upload body to a fresh file.
    ///
    /// The returned handle removes the file when released or dropped, and a
    /// partially written file is removed before an error is returned.
    pub async fn materialize(&self, upload: &mut AcceptedUpload) -> Result<TempArtifact, UploadError> {
        let path = self.dir.join(Self::artifact_name(upload.file_name()));
        let artifact = TempArtifact::new(path);

        let mut file = tokio::fs::File::create(artifact.path())
            .await
            .map_err(|e| UploadError::TempWrite(e.to_string()))?;

        let written = tokio::io::copy(upload.body_mut(), &mut file)
            .await
            .map_err(|e| UploadError::TempWrite(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| UploadError::TempWrite(e.to_string()))?;

        debug!("Wrote {} bytes to {}", written, artifact.path().display());
        Ok(artifact)
    }
}

/// Exclusive handle to one temp file, removed exactly once
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    released: bool,
}

impl TempArtifact {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now. Failures are logged, never returned.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temp file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Temp file {} already gone", self.path.display())
            }
            Err(e) => warn!(
                "{}",
                UploadError::TempCleanup(format!("{}: {}", self.path.display(), e))
            ),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{ChunkSource, RequestGate, UploadRequest};
    use bytes::Bytes;
    use std::io;

    struct OneShot(Option<Bytes>);

    impl ChunkSource for OneShot {
        async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
            Ok(self.0.take())
        }
    }

    async fn accepted(name: &str, body: &'static [u8]) -> AcceptedUpload {
        RequestGate::default()
            .validate(UploadRequest {
                file_name: Some(name.to_string()),
                content_type: Some("image/png".to_string()),
                body: OneShot(Some(Bytes::from_static(body))),
            })
            .await
            .unwrap()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_names_are_unique_and_contained() {
        let a = TempArtifactManager::artifact_name("photo.jpg");
        let b = TempArtifactManager::artifact_name("photo.jpg");
        assert_ne!(a, b);
        assert!(a.starts_with("temp_") && a.ends_with("_photo.jpg"));

        let sneaky = TempArtifactManager::artifact_name("../../etc/passwd");
        assert!(sneaky.ends_with("_passwd"));
        assert!(!sneaky.contains('/'));

        assert!(TempArtifactManager::artifact_name("dir/").ends_with("_upload"));
    }

    #[tokio::test]
    async fn test_materialize_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TempArtifactManager::new(dir.path());
        let mut upload = accepted("a.png", b"payload").await;

        let artifact = manager.materialize(&mut upload).await.unwrap();
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"payload");
        assert_eq!(entries(dir.path()), 1);

        artifact.release();
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TempArtifactManager::new(dir.path());
        let mut upload = accepted("b.png", b"xyz").await;

        {
            let _artifact = manager.materialize(&mut upload).await.unwrap();
            assert_eq!(entries(dir.path()), 1);
        }
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_release_after_external_delete_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TempArtifactManager::new(dir.path());
        let mut upload = accepted("c.png", b"xyz").await;

        let artifact = manager.materialize(&mut upload).await.unwrap();
        std::fs::remove_file(artifact.path()).unwrap();
        artifact.release();
    }

    #[tokio::test]
    async fn test_unwritable_dir() {
        let manager = TempArtifactManager::new("/nonexistent/uploads");
        let mut upload = accepted("d.png", b"xyz").await;

        let result = manager.materialize(&mut upload).await;
        assert!(matches!(result, Err(UploadError::TempWrite(_))));
    }
}
