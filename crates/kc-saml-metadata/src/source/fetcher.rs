//! HTTP transport capability.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    HeaderName, ACCEPT, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};

use crate::config::BasicCredentials;
use crate::error::{ResolverError, ResolverResult};

/// A metadata GET request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target URL.
    pub url: String,
    /// `Accept` header value.
    pub accept: String,
    /// `If-None-Match` header value.
    pub if_none_match: Option<String>,
    /// `If-Modified-Since` header value.
    pub if_modified_since: Option<String>,
    /// BASIC credentials, sent preemptively.
    pub credentials: Option<BasicCredentials>,
    /// Request timeout.
    pub timeout: Duration,
}

impl FetchRequest {
    /// Creates an unconditional GET for `url`.
    #[must_use]
    pub fn get(url: impl Into<String>, accept: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            accept: accept.into(),
            if_none_match: None,
            if_modified_since: None,
            credentials: None,
            timeout,
        }
    }
}

/// The parts of an HTTP response a metadata source consumes.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,
    /// `ETag` header.
    pub etag: Option<String>,
    /// `Last-Modified` header.
    pub last_modified: Option<String>,
    /// Response body.
    pub body: Bytes,
}

/// Performs metadata HTTP requests.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Sends the request and returns the response whatever its status.
    ///
    /// # Errors
    ///
    /// Returns a fetch error for transport failures.
    async fn fetch(&self, request: &FetchRequest) -> ResolverResult<FetchResponse>;
}

/// [`MetadataFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Creates a fetcher with a default client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client cannot be built.
    pub fn new() -> ResolverResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kc-saml-metadata/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolverError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetadataFetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> ResolverResult<FetchResponse> {
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .header(ACCEPT, &request.accept);

        if let Some(etag) = &request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(since) = &request.if_modified_since {
            builder = builder.header(IF_MODIFIED_SINCE, since);
        }
        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ResolverError::fetch(format!("GET {} failed: {e}", request.url)))?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let status = response.status().as_u16();
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolverError::fetch(format!("reading body of {} failed: {e}", request.url)))?;

        Ok(FetchResponse {
            status,
            etag,
            last_modified,
            body,
        })
    }
}
