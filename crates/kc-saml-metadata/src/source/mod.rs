//! Metadata sources for reloading resolvers.
//!
//! A source produces the raw bytes of the next metadata generation, or
//! `None` when the origin reports the document as unchanged.

mod fetcher;
mod file_backed;
mod filesystem;
mod http;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::document::MetadataDocument;
use crate::error::ResolverResult;

pub use fetcher::{FetchRequest, FetchResponse, MetadataFetcher, ReqwestFetcher};
pub use file_backed::FileBackedHttpMetadataSource;
pub use filesystem::FilesystemMetadataSource;
pub use http::{ConditionalCacheToken, HttpMetadataSource};

/// Where a reloading resolver gets its metadata from.
#[async_trait]
pub trait MetadataSource: Send + Sync + 'static {
    /// Describes the source for logs (URL or path).
    fn describe(&self) -> String;

    /// Fetches the current document bytes.
    ///
    /// Returns `Ok(None)` if the document has not changed since the last
    /// successful fetch.
    async fn fetch_metadata(&self) -> ResolverResult<Option<Bytes>>;

    /// Runs after a fetched document has been parsed and indexed, before the
    /// new store is published.
    async fn post_process(&self, _raw: &Bytes, _document: &MetadataDocument) -> ResolverResult<()> {
        Ok(())
    }

    /// Returns a one-off replacement for the next computed refresh delay.
    fn take_next_refresh_override(&self) -> Option<Duration> {
        None
    }
}
