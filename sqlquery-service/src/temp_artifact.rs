//! Transient on-disk artifacts.
//!
//! A [`TempArtifact`] owns a file that must not outlive the response built
//! from it. The file is removed when the guard drops: after the body has been
//! fully sent, when the client goes away mid-stream, or when the response is
//! discarded before sending.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures::Stream;
use tempfile::TempPath;
use tokio_util::io::ReaderStream;

/// Guard deleting its file exactly once, on drop.
#[derive(Debug)]
pub struct TempArtifact {
    path: Option<TempPath>,
}

impl TempArtifact {
    pub fn new(path: TempPath) -> Self {
        Self { path: Some(path) }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens the file and ties the guard to the resulting byte stream.
    pub async fn into_stream(self) -> io::Result<ArtifactStream> {
        let path = self
            .path()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "artifact already removed"))?;
        let file = tokio::fs::File::open(path).await?;
        Ok(ArtifactStream {
            inner: ReaderStream::new(file),
            artifact: self,
        })
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => tracing::debug!(path = %shown, "Removed temp file"),
                Err(e) => tracing::warn!(path = %shown, error = %e, "Failed to remove temp file"),
            }
        }
    }
}

/// File contents as a byte stream. Dropping the stream closes the file
/// and then removes it.
pub struct ArtifactStream {
    // Field order matters: the file handle drops before the guard.
    inner: ReaderStream<tokio::fs::File>,
    artifact: TempArtifact,
}

impl ArtifactStream {
    pub fn path(&self) -> Option<&Path> {
        self.artifact.path()
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
