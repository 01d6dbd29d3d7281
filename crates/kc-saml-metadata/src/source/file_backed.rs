//! HTTP source with an on-disk backup of the last good document.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::http::HttpMetadataSource;
use super::MetadataSource;
use crate::config::FileBackedConfig;
use crate::document::MetadataDocument;
use crate::error::{ResolverError, ResolverResult};

/// Wraps an [`HttpMetadataSource`], persisting every accepted document to a
/// backup file and serving that file when the origin cannot be reached.
#[derive(Debug)]
pub struct FileBackedHttpMetadataSource {
    http: HttpMetadataSource,
    config: FileBackedConfig,
    first_fetch: AtomicBool,
    served_from_backup: AtomicBool,
    next_refresh_override: Mutex<Option<Duration>>,
}

impl FileBackedHttpMetadataSource {
    /// Creates the source, validating the backup path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the backup path is a directory, or
    /// cannot be read and written or created.
    pub fn new(http: HttpMetadataSource, config: FileBackedConfig) -> ResolverResult<Self> {
        validate_backup_path(&config.backup_file)?;
        Ok(Self {
            http,
            config,
            first_fetch: AtomicBool::new(true),
            served_from_backup: AtomicBool::new(false),
            next_refresh_override: Mutex::new(None),
        })
    }

    /// Returns the backup file path.
    #[must_use]
    pub fn backup_file(&self) -> &Path {
        &self.config.backup_file
    }

    /// Returns the wrapped HTTP source.
    #[must_use]
    pub const fn http(&self) -> &HttpMetadataSource {
        &self.http
    }

    async fn read_backup(&self) -> std::io::Result<Option<Bytes>> {
        match tokio::fs::read(&self.config.backup_file).await {
            Ok(contents) if contents.is_empty() => Ok(None),
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write_backup(&self, raw: &Bytes) -> std::io::Result<()> {
        let path = &self.config.backup_file;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, raw).await?;
        if let Err(err) = tokio::fs::rename(&tmp, path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                debug!(tmp = %tmp.display(), error = %cleanup, "unable to remove temporary backup file");
            }
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataSource for FileBackedHttpMetadataSource {
    fn describe(&self) -> String {
        format!(
            "{} (backup {})",
            self.http.describe(),
            self.config.backup_file.display()
        )
    }

    async fn fetch_metadata(&self) -> ResolverResult<Option<Bytes>> {
        let first = self.first_fetch.swap(false, Ordering::AcqRel);
        if first && self.config.initialize_from_backup_file {
            match self.read_backup().await {
                Ok(Some(raw)) => {
                    info!(
                        backup = %self.config.backup_file.display(),
                        "initializing metadata from backup file"
                    );
                    *self.next_refresh_override.lock() =
                        Some(self.config.backup_file_init_next_refresh_delay);
                    self.served_from_backup.store(true, Ordering::Release);
                    return Ok(Some(raw));
                }
                Ok(None) => {}
                Err(err) => warn!(
                    backup = %self.config.backup_file.display(),
                    error = %err,
                    "unable to read backup file, fetching from origin"
                ),
            }
        }

        match self.http.fetch_metadata().await {
            Ok(fetched) => {
                self.served_from_backup.store(false, Ordering::Release);
                Ok(fetched)
            }
            Err(fetch_err) => {
                warn!(
                    url = %self.http.describe(),
                    error = %fetch_err,
                    "metadata fetch failed, falling back to backup file"
                );
                match self.read_backup().await {
                    Ok(Some(raw)) => {
                        self.served_from_backup.store(true, Ordering::Release);
                        Ok(Some(raw))
                    }
                    Ok(None) => Err(ResolverError::fetch(format!(
                        "{fetch_err}; backup file {} does not exist",
                        self.config.backup_file.display()
                    ))),
                    Err(io_err) => Err(ResolverError::fetch(format!(
                        "{fetch_err}; backup file {} unreadable: {io_err}",
                        self.config.backup_file.display()
                    ))),
                }
            }
        }
    }

    async fn post_process(&self, raw: &Bytes, _document: &MetadataDocument) -> ResolverResult<()> {
        if self.served_from_backup.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Err(err) = validate_backup_path(&self.config.backup_file) {
            warn!(error = %err, "skipping metadata backup write");
            return Ok(());
        }
        match self.write_backup(raw).await {
            Ok(()) => debug!(
                backup = %self.config.backup_file.display(),
                bytes = raw.len(),
                "wrote metadata backup file"
            ),
            Err(err) => warn!(
                backup = %self.config.backup_file.display(),
                error = %err,
                "unable to write metadata backup file"
            ),
        }
        Ok(())
    }

    fn take_next_refresh_override(&self) -> Option<Duration> {
        self.next_refresh_override.lock().take()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Checks the backup path is a readable and writable file, creating its
/// parent directories if needed.
fn validate_backup_path(path: &Path) -> ResolverResult<()> {
    let display = path.display();
    if path.as_os_str().is_empty() {
        return Err(ResolverError::config("backup file path is empty"));
    }

    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(ResolverError::config(format!(
            "backup file {display} is a directory"
        ))),
        Ok(_) => OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .map(drop)
            .map_err(|e| {
                ResolverError::config(format!("backup file {display} is not readable and writable: {e}"))
            }),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ResolverError::config(format!(
                        "unable to create backup directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            std::fs::File::create(path)
                .and_then(|_| std::fs::remove_file(path))
                .map_err(|e| ResolverError::config(format!("backup file {display} cannot be created: {e}")))
        }
        Err(err) => Err(ResolverError::config(format!(
            "unable to inspect backup file {display}: {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSourceConfig;
    use crate::source::MetadataFetcher;
    use crate::test_support::{entity_xml, ScriptedFetcher};
    use std::sync::Arc;

    fn http(fetcher: &Arc<ScriptedFetcher>) -> HttpMetadataSource {
        HttpMetadataSource::with_fetcher(
            HttpSourceConfig::new("https://md.example.org/md.xml"),
            Arc::clone(fetcher) as Arc<dyn MetadataFetcher>,
        )
        .unwrap()
    }

    #[test]
    fn backup_path_validation() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());

        let as_dir = FileBackedHttpMetadataSource::new(http(&fetcher), FileBackedConfig::new(dir.path()));
        assert!(matches!(as_dir, Err(ResolverError::Configuration(_))));

        let nested = dir.path().join("a/b/md.xml");
        assert!(FileBackedHttpMetadataSource::new(http(&fetcher), FileBackedConfig::new(&nested)).is_ok());
        assert!(nested.parent().unwrap().is_dir());
        assert!(!nested.exists());
    }

    #[tokio::test]
    async fn falls_back_to_backup_on_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("md.xml");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let xml = entity_xml("https://idp.example.org", None);
        fetcher.push_status(200, &xml, None);
        fetcher.push_error("connection refused");
        fetcher.push_error("connection refused");

        let source = FileBackedHttpMetadataSource::new(http(&fetcher), FileBackedConfig::new(&backup)).unwrap();

        let raw = source.fetch_metadata().await.unwrap().unwrap();
        let document = MetadataDocument::parse(raw.clone()).unwrap();
        source.post_process(&raw, &document).await.unwrap();
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), xml);

        let fallback = source.fetch_metadata().await.unwrap().unwrap();
        assert_eq!(fallback, raw);

        std::fs::remove_file(&backup).unwrap();
        assert!(source.fetch_metadata().await.unwrap_err().is_fetch_error());
    }

    #[tokio::test]
    async fn failed_backup_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("md.xml");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let xml = entity_xml("https://idp.example.org", None);
        fetcher.push_status(200, &xml, None);

        let source = FileBackedHttpMetadataSource::new(http(&fetcher), FileBackedConfig::new(&backup)).unwrap();
        let raw = source.fetch_metadata().await.unwrap().unwrap();
        let document = MetadataDocument::parse(raw.clone()).unwrap();

        // The backup path turned into a directory after construction.
        std::fs::create_dir(&backup).unwrap();
        source.post_process(&raw, &document).await.unwrap();
        assert!(backup.is_dir());
        assert!(!temp_path(&backup).exists());

        assert!(source.write_backup(&raw).await.is_err());
        assert!(!temp_path(&backup).exists());
    }

    #[tokio::test]
    async fn first_fetch_served_from_existing_backup() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("md.xml");
        std::fs::write(&backup, entity_xml("https://cached.example.org", None)).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());

        let config = FileBackedConfig::new(&backup)
            .with_backup_file_init_next_refresh_delay(Duration::from_secs(2));
        let source = FileBackedHttpMetadataSource::new(http(&fetcher), config).unwrap();

        assert!(source.fetch_metadata().await.unwrap().is_some());
        assert_eq!(fetcher.request_count(), 0);
        assert_eq!(source.take_next_refresh_override(), Some(Duration::from_secs(2)));
        assert_eq!(source.take_next_refresh_override(), None);
    }

    #[tokio::test]
    async fn backup_disabled_at_start_goes_to_origin() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("md.xml");
        std::fs::write(&backup, entity_xml("https://cached.example.org", None)).unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_status(304, "", None);

        let config = FileBackedConfig::new(&backup).with_initialize_from_backup_file(false);
        let source = FileBackedHttpMetadataSource::new(http(&fetcher), config).unwrap();

        assert!(source.fetch_metadata().await.unwrap().is_none());
        assert_eq!(fetcher.request_count(), 1);
    }
}
