//! HTTP origin for per-entity metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::{form_urlencoded, Url};

use crate::config::{BasicCredentials, DEFAULT_ACCEPT};
use crate::error::{ResolverError, ResolverResult};
use crate::source::{FetchRequest, MetadataFetcher, ReqwestFetcher};

/// Placeholder replaced by the encoded entity ID in URL templates.
pub const ENTITY_ID_PLACEHOLDER: &str = "${entityID}";

/// Fetches the metadata of a single entity.
#[async_trait]
pub trait DynamicOrigin: Send + Sync {
    /// Describes the origin for logs.
    fn describe(&self) -> String;

    /// Fetches the document for `entity_id`.
    ///
    /// Returns `Ok(None)` when the origin has no metadata for the entity.
    async fn fetch_entity(&self, entity_id: &str) -> ResolverResult<Option<Bytes>>;
}

/// How the request URL for an entity is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestUrlBuilder {
    /// Metadata Query Protocol: `{base_url}/entities/{encoded entityID}`.
    MetadataQueryProtocol {
        /// MDQ responder base URL.
        base_url: String,
    },
    /// The entity ID itself, when it is an http(s) URL.
    WellKnownLocation,
    /// A URL template containing `${entityID}`.
    Template {
        /// The template.
        template: String,
    },
}

impl RequestUrlBuilder {
    /// Builds the URL for `entity_id`, or `None` if this builder cannot
    /// address it.
    #[must_use]
    pub fn build(&self, entity_id: &str) -> Option<String> {
        if entity_id.is_empty() {
            return None;
        }
        match self {
            Self::MetadataQueryProtocol { base_url } => Some(format!(
                "{}/entities/{}",
                base_url.trim_end_matches('/'),
                encode(entity_id)
            )),
            Self::WellKnownLocation => Url::parse(entity_id)
                .ok()
                .filter(|url| matches!(url.scheme(), "http" | "https"))
                .map(|_| entity_id.to_string()),
            Self::Template { template } => {
                Some(template.replace(ENTITY_ID_PLACEHOLDER, &encode(entity_id)))
            }
        }
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// [`DynamicOrigin`] that issues one GET per entity.
///
/// `200` yields the body, `404` means no metadata, anything else is a fetch
/// error.
pub struct HttpDynamicOrigin {
    url_builder: RequestUrlBuilder,
    fetcher: Arc<dyn MetadataFetcher>,
    accept: String,
    timeout: Duration,
    credentials: Option<BasicCredentials>,
}

impl std::fmt::Debug for HttpDynamicOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDynamicOrigin")
            .field("url_builder", &self.url_builder)
            .field("accept", &self.accept)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpDynamicOrigin {
    /// Creates an origin using the default `reqwest` fetcher.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built or
    /// the builder's base URL is invalid.
    pub fn new(url_builder: RequestUrlBuilder) -> ResolverResult<Self> {
        Self::with_fetcher(url_builder, Arc::new(ReqwestFetcher::new()?))
    }

    /// Creates an origin using the given fetcher.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the builder's base URL or template is
    /// invalid.
    pub fn with_fetcher(
        url_builder: RequestUrlBuilder,
        fetcher: Arc<dyn MetadataFetcher>,
    ) -> ResolverResult<Self> {
        match &url_builder {
            RequestUrlBuilder::MetadataQueryProtocol { base_url } => {
                Url::parse(base_url).map_err(|e| {
                    ResolverError::config(format!("invalid MDQ base URL '{base_url}': {e}"))
                })?;
            }
            RequestUrlBuilder::Template { template } if !template.contains(ENTITY_ID_PLACEHOLDER) => {
                return Err(ResolverError::config(format!(
                    "URL template '{template}' has no {ENTITY_ID_PLACEHOLDER} placeholder"
                )));
            }
            _ => {}
        }

        Ok(Self {
            url_builder,
            fetcher,
            accept: DEFAULT_ACCEPT.to_string(),
            timeout: Duration::from_secs(30),
            credentials: None,
        })
    }

    /// Sets the `Accept` header value.
    #[must_use]
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets BASIC credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: BasicCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Returns the URL builder.
    #[must_use]
    pub const fn url_builder(&self) -> &RequestUrlBuilder {
        &self.url_builder
    }
}

#[async_trait]
impl DynamicOrigin for HttpDynamicOrigin {
    fn describe(&self) -> String {
        format!("{:?}", self.url_builder)
    }

    async fn fetch_entity(&self, entity_id: &str) -> ResolverResult<Option<Bytes>> {
        let Some(url) = self.url_builder.build(entity_id) else {
            debug!(entity_id, "no request URL for entity");
            return Ok(None);
        };

        let request = FetchRequest {
            credentials: self.credentials.clone(),
            ..FetchRequest::get(url, &self.accept, self.timeout)
        };
        let response = self.fetcher.fetch(&request).await?;

        match response.status {
            200 => Ok(Some(response.body)),
            404 => {
                debug!(entity_id, url = %request.url, "origin has no metadata for entity");
                Ok(None)
            }
            status => Err(ResolverError::fetch(format!(
                "unexpected HTTP status {status} from {}",
                request.url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedFetcher;

    #[test]
    fn mdq_url_encodes_entity_id() {
        let builder = RequestUrlBuilder::MetadataQueryProtocol {
            base_url: "https://mdq.example.org/".to_string(),
        };
        assert_eq!(
            builder.build("https://sp.example.org/shibboleth").as_deref(),
            Some("https://mdq.example.org/entities/https%3A%2F%2Fsp.example.org%2Fshibboleth")
        );
        assert_eq!(builder.build(""), None);
    }

    #[test]
    fn well_known_location_requires_http_entity_id() {
        let builder = RequestUrlBuilder::WellKnownLocation;
        assert_eq!(
            builder.build("https://idp.example.org/metadata").as_deref(),
            Some("https://idp.example.org/metadata")
        );
        assert_eq!(builder.build("urn:mace:example.org:idp"), None);
    }

    #[test]
    fn template_substitutes_placeholder() {
        let builder = RequestUrlBuilder::Template {
            template: "https://md.example.org/lookup?id=${entityID}".to_string(),
        };
        assert_eq!(
            builder.build("urn:x y").as_deref(),
            Some("https://md.example.org/lookup?id=urn%3Ax+y")
        );
    }

    #[test]
    fn rejects_template_without_placeholder() {
        let fetcher: Arc<dyn MetadataFetcher> = Arc::new(ScriptedFetcher::default());
        let result = HttpDynamicOrigin::with_fetcher(
            RequestUrlBuilder::Template {
                template: "https://md.example.org/all.xml".to_string(),
            },
            fetcher,
        );
        assert!(matches!(result, Err(ResolverError::Configuration(_))));
    }

    #[tokio::test]
    async fn status_handling() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_status(200, "<EntityDescriptor entityID=\"a\"/>", None);
        fetcher.push_status(404, "", None);
        fetcher.push_status(503, "", None);

        let origin = HttpDynamicOrigin::with_fetcher(
            RequestUrlBuilder::MetadataQueryProtocol {
                base_url: "https://mdq.example.org".to_string(),
            },
            Arc::clone(&fetcher) as Arc<dyn MetadataFetcher>,
        )
        .unwrap();

        assert!(origin.fetch_entity("a").await.unwrap().is_some());
        assert!(origin.fetch_entity("b").await.unwrap().is_none());
        assert!(origin.fetch_entity("c").await.unwrap_err().is_fetch_error());
        assert_eq!(
            fetcher.requests.lock()[1].url,
            "https://mdq.example.org/entities/b"
        );
    }
}
