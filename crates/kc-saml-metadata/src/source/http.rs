//! HTTP metadata source with conditional GET.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use super::fetcher::{FetchRequest, MetadataFetcher, ReqwestFetcher};
use super::MetadataSource;
use crate::config::HttpSourceConfig;
use crate::error::{ResolverError, ResolverResult};

/// Validators from the last `200 OK` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalCacheToken {
    /// Last `ETag`, sent back as `If-None-Match`.
    pub etag: Option<String>,
    /// Last `Last-Modified`, sent back as `If-Modified-Since`.
    pub last_modified: Option<String>,
}

/// Fetches metadata from a URL, skipping unchanged documents via
/// `If-None-Match` / `If-Modified-Since`.
pub struct HttpMetadataSource {
    config: HttpSourceConfig,
    fetcher: Arc<dyn MetadataFetcher>,
    token: Mutex<ConditionalCacheToken>,
}

impl std::fmt::Debug for HttpMetadataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetadataSource")
            .field("config", &self.config)
            .field("token", &*self.token.lock())
            .finish_non_exhaustive()
    }
}

impl HttpMetadataSource {
    /// Creates a source using the default `reqwest` fetcher.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid URL or if the HTTP
    /// client cannot be built.
    pub fn new(config: HttpSourceConfig) -> ResolverResult<Self> {
        Self::with_fetcher(config, Arc::new(ReqwestFetcher::new()?))
    }

    /// Creates a source using the given fetcher.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is not an absolute http(s) URL.
    pub fn with_fetcher(
        config: HttpSourceConfig,
        fetcher: Arc<dyn MetadataFetcher>,
    ) -> ResolverResult<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| ResolverError::config(format!("invalid metadata URL '{}': {e}", config.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ResolverError::config(format!(
                "metadata URL '{}' must use http or https",
                config.url
            )));
        }

        Ok(Self {
            config,
            fetcher,
            token: Mutex::new(ConditionalCacheToken::default()),
        })
    }

    /// Returns the source configuration.
    #[must_use]
    pub const fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    /// Returns the validators that will be sent with the next request.
    #[must_use]
    pub fn cache_token(&self) -> ConditionalCacheToken {
        self.token.lock().clone()
    }

    fn request(&self) -> FetchRequest {
        let token = self.token.lock().clone();
        FetchRequest {
            if_none_match: token.etag,
            if_modified_since: token.last_modified,
            credentials: self.config.credentials.clone(),
            ..FetchRequest::get(&self.config.url, &self.config.accept, self.config.timeout)
        }
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    async fn fetch_metadata(&self) -> ResolverResult<Option<Bytes>> {
        let request = self.request();
        let response = self.fetcher.fetch(&request).await?;

        match response.status {
            304 => {
                debug!(url = %self.config.url, "metadata not modified");
                Ok(None)
            }
            200 => {
                let mut token = self.token.lock();
                if response.etag.is_some() {
                    token.etag = response.etag;
                }
                if response.last_modified.is_some() {
                    token.last_modified = response.last_modified;
                }
                debug!(url = %self.config.url, bytes = response.body.len(), "fetched metadata");
                Ok(Some(response.body))
            }
            status => Err(ResolverError::fetch(format!(
                "unexpected HTTP status {status} from {}",
                self.config.url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedFetcher;

    fn source(fetcher: &Arc<ScriptedFetcher>) -> HttpMetadataSource {
        HttpMetadataSource::with_fetcher(
            HttpSourceConfig::new("https://md.example.org/federation.xml")
                .with_credentials("fed", "secret"),
            Arc::clone(fetcher) as Arc<dyn MetadataFetcher>,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn conditional_headers_follow_last_ok_response() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_status(200, "<EntityDescriptor entityID=\"a\"/>", Some("\"v1\""));
        fetcher.push_status(304, "", None);
        let source = source(&fetcher);

        assert!(source.fetch_metadata().await.unwrap().is_some());
        assert!(source.fetch_metadata().await.unwrap().is_none());

        let requests = fetcher.requests.lock();
        assert_eq!(requests[0].if_none_match, None);
        assert_eq!(requests[1].if_none_match.as_deref(), Some("\"v1\""));
        assert_eq!(requests[1].credentials.as_ref().map(|c| c.username.as_str()), Some("fed"));
        assert_eq!(requests[1].accept, crate::config::DEFAULT_ACCEPT);
    }

    #[tokio::test]
    async fn last_modified_becomes_if_modified_since() {
        const STAMP: &str = "Wed, 14 Oct 2026 08:00:00 GMT";
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_response(200, "<EntityDescriptor entityID=\"a\"/>", None, Some(STAMP));
        fetcher.push_status(304, "", None);
        let source = source(&fetcher);

        assert!(source.fetch_metadata().await.unwrap().is_some());
        assert_eq!(source.cache_token().last_modified.as_deref(), Some(STAMP));
        assert!(source.fetch_metadata().await.unwrap().is_none());

        let requests = fetcher.requests.lock();
        assert_eq!(requests[0].if_modified_since, None);
        assert_eq!(requests[1].if_modified_since.as_deref(), Some(STAMP));
        assert_eq!(requests[1].if_none_match, None);
    }

    #[tokio::test]
    async fn unexpected_status_is_fetch_error() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_status(500, "oops", None);
        let source = source(&fetcher);

        let err = source.fetch_metadata().await.unwrap_err();
        assert!(err.is_fetch_error());
        assert_eq!(source.cache_token(), ConditionalCacheToken::default());
    }

    #[test]
    fn rejects_invalid_urls() {
        let fetcher: Arc<dyn MetadataFetcher> = Arc::new(ScriptedFetcher::default());
        for url in ["not a url", "ftp://md.example.org/md.xml"] {
            let result = HttpMetadataSource::with_fetcher(HttpSourceConfig::new(url), Arc::clone(&fetcher));
            assert!(matches!(result, Err(ResolverError::Configuration(_))));
        }
    }
}
