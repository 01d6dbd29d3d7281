//! Local metadata file source.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::MetadataSource;
use crate::document::MetadataDocument;
use crate::error::{ResolverError, ResolverResult};

/// Reloads a metadata file when its modification time advances.
#[derive(Debug)]
pub struct FilesystemMetadataSource {
    path: PathBuf,
    last_modified: Mutex<Option<SystemTime>>,
    pending_modified: Mutex<Option<SystemTime>>,
}

impl FilesystemMetadataSource {
    /// Creates a source for the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: Mutex::new(None),
            pending_modified: Mutex::new(None),
        }
    }

    /// Returns the metadata file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetadataSource for FilesystemMetadataSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch_metadata(&self) -> ResolverResult<Option<Bytes>> {
        let fetch_error =
            |e: std::io::Error| ResolverError::fetch(format!("{}: {e}", self.path.display()));

        let meta = tokio::fs::metadata(&self.path).await.map_err(fetch_error)?;
        if meta.is_dir() {
            return Err(ResolverError::fetch(format!(
                "{} is a directory",
                self.path.display()
            )));
        }
        let modified = meta.modified().ok();

        let last = *self.last_modified.lock();
        if let (Some(last), Some(modified)) = (last, modified) {
            if modified <= last {
                debug!(path = %self.path.display(), "metadata file unchanged");
                return Ok(None);
            }
        }

        let contents = tokio::fs::read(&self.path).await.map_err(fetch_error)?;
        *self.pending_modified.lock() = modified;
        Ok(Some(Bytes::from(contents)))
    }

    async fn post_process(&self, _raw: &Bytes, _document: &MetadataDocument) -> ResolverResult<()> {
        let pending = self.pending_modified.lock().take();
        if pending.is_some() {
            *self.last_modified.lock() = pending;
        }
        Ok(())
    }
}
