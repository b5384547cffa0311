//! Output artifact sinks for docroute
//!
//! The executor hands finished bytes to an [`ArtifactSink`] and records the
//! location it returns. The sink decides where bytes live; the job manager
//! decides how long they live and asks the sink to discard them on eviction.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for sink operations
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Location {0} is not managed by this sink")]
    ForeignLocation(String),
}

/// Destination for converted output
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist `data` and return a location handle
    async fn store(&self, job_id: &str, file_name: &str, data: Bytes) -> Result<String, SinkError>;

    /// Remove a previously stored artifact
    async fn discard(&self, location: &str) -> Result<(), SinkError>;
}

/// Strip any directory components from a caller-supplied file name
fn safe_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("output")
        .to_string()
}

/// Writes artifacts to `<root>/<job_id>/<file_name>`
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn store(&self, job_id: &str, file_name: &str, data: Bytes) -> Result<String, SinkError> {
        let dir = self.root.join(safe_file_name(job_id));
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(safe_file_name(file_name));
        tokio::fs::write(&path, &data).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn discard(&self, location: &str) -> Result<(), SinkError> {
        let path = PathBuf::from(location);
        if !path.starts_with(&self.root) {
            return Err(SinkError::ForeignLocation(location.to_string()));
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            if parent != self.root {
                // Only succeeds once the job directory is empty
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }
}

const MEMORY_SCHEME: &str = "memory://";

/// Keeps artifacts in process memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<HashMap<String, Bytes>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, location: &str) -> Option<Bytes> {
        self.artifacts.lock().get(location).cloned()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn store(&self, job_id: &str, file_name: &str, data: Bytes) -> Result<String, SinkError> {
        let location = format!("{}{}/{}", MEMORY_SCHEME, job_id, safe_file_name(file_name));
        self.artifacts.lock().insert(location.clone(), data);
        Ok(location)
    }

    async fn discard(&self, location: &str) -> Result<(), SinkError> {
        if !location.starts_with(MEMORY_SCHEME) {
            return Err(SinkError::ForeignLocation(location.to_string()));
        }
        self.artifacts.lock().remove(location);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_file_name_strips_directories() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("book.pdf"), "book.pdf");
        assert_eq!(safe_file_name(""), "output");
        assert_eq!(safe_file_name(".."), "output");
    }

    #[tokio::test]
    async fn test_directory_sink_store_and_discard() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(tmp.path());

        let location = sink
            .store("job-1", "novel.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();
        let path = PathBuf::from(&location);
        assert_eq!(path, tmp.path().join("job-1").join("novel.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF");

        sink.discard(&location).await.unwrap();
        assert!(!path.exists());
        assert!(!tmp.path().join("job-1").exists());

        // discarding twice is fine
        sink.discard(&location).await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_sink_refuses_foreign_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(tmp.path().join("artifacts"));
        let err = sink.discard("/etc/hosts").await.unwrap_err();
        assert!(matches!(err, SinkError::ForeignLocation(_)));
    }

    #[tokio::test]
    async fn test_memory_sink_roundtrip() {
        let sink = MemorySink::new();
        let location = sink
            .store("job-2", "out.html", Bytes::from_static(b"<p>hi</p>"))
            .await
            .unwrap();
        assert_eq!(location, "memory://job-2/out.html");
        assert_eq!(sink.get(&location).unwrap(), Bytes::from_static(b"<p>hi</p>"));
        assert_eq!(sink.len(), 1);

        sink.discard(&location).await.unwrap();
        assert!(sink.is_empty());
    }
}
