//! Scripted collaborators shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{ResolverError, ResolverResult};
use crate::source::{FetchRequest, FetchResponse, MetadataFetcher, MetadataSource};

/// Renders a single-entity document with one IdP role.
pub fn entity_xml(entity_id: &str, valid_until: Option<&str>) -> String {
    let valid_until = valid_until
        .map(|v| format!(r#" validUntil="{v}""#))
        .unwrap_or_default();
    format!(
        r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}"{valid_until}>
    <IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/>
</EntityDescriptor>"#
    )
}

/// Renders a container with one IdP-role entity per ID.
pub fn federation_xml(entity_ids: &[&str]) -> String {
    let members: String = entity_ids
        .iter()
        .map(|id| {
            format!(
                r#"<EntityDescriptor entityID="{id}"><IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/></EntityDescriptor>"#
            )
        })
        .collect();
    format!(
        r#"<EntitiesDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" Name="test">{members}</EntitiesDescriptor>"#
    )
}

/// Replays canned HTTP responses and records the requests it saw.
#[derive(Default)]
pub struct ScriptedFetcher {
    pub responses: Mutex<VecDeque<ResolverResult<FetchResponse>>>,
    pub requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn push_status(&self, status: u16, body: &str, etag: Option<&str>) {
        self.push_response(status, body, etag, None);
    }

    pub fn push_response(
        &self,
        status: u16,
        body: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) {
        self.responses.lock().push_back(Ok(FetchResponse {
            status,
            etag: etag.map(str::to_string),
            last_modified: last_modified.map(str::to_string),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }));
    }

    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .push_back(Err(ResolverError::fetch(message)));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl MetadataFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> ResolverResult<FetchResponse> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ResolverError::fetch("no scripted response")))
    }
}

/// Replays canned fetch results; an exhausted script reports "unchanged".
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<ResolverResult<Option<Bytes>>>>,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
    post_processed: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_document(self, xml: impl Into<String>) -> Self {
        self.push_document(xml);
        self
    }

    pub fn push_document(&self, xml: impl Into<String>) {
        self.script
            .lock()
            .push_back(Ok(Some(Bytes::from(xml.into()))));
    }

    /// Delays every later fetch by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn push_unchanged(&self) {
        self.script.lock().push_back(Ok(None));
    }

    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .push_back(Err(ResolverError::fetch(message)));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn post_processed(&self) -> usize {
        self.post_processed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn fetch_metadata(&self) -> ResolverResult<Option<Bytes>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().pop_front().unwrap_or(Ok(None))
    }

    async fn post_process(
        &self,
        _raw: &Bytes,
        _document: &crate::document::MetadataDocument,
    ) -> ResolverResult<()> {
        self.post_processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
