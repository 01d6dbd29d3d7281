//! Dynamic resolver integration tests against a Metadata Query responder.

mod common;

use std::sync::Arc;

use kc_saml_metadata::{
    CriteriaSet, DynamicMetadataResolver, HttpDynamicOrigin, MetadataResolver, RequestUrlBuilder,
};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{entity_document, init_tracing};

const SP: &str = "https://sp.example.org/shibboleth";

async fn mdq_resolver(server: &MockServer) -> anyhow::Result<DynamicMetadataResolver> {
    let origin = HttpDynamicOrigin::new(RequestUrlBuilder::MetadataQueryProtocol {
        base_url: server.uri(),
    })?;
    let resolver = DynamicMetadataResolver::builder("mdq", Arc::new(origin)).build()?;
    resolver.initialize().await?;
    Ok(resolver)
}

/// Tests that an entity is fetched once and then served from cache.
#[tokio::test]
async fn test_mdq_fetch_and_cache() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/entities/https%3A%2F%2Fsp\.example\.org%2Fshibboleth$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(entity_document(SP)))
        .mount(&server)
        .await;

    let resolver = mdq_resolver(&server).await?;

    let first = resolver.resolve_single(&CriteriaSet::entity_id(SP)).await?;
    assert_eq!(first.map(|e| e.entity_id.clone()).as_deref(), Some(SP));
    assert_eq!(resolver.resolve(&CriteriaSet::entity_id(SP)).await?.len(), 1);

    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);
    assert_eq!(resolver.cached_entity_ids(), vec![SP.to_string()]);

    resolver.destroy().await;
    Ok(())
}

/// Tests that unknown entities and origin failures are empty results.
#[tokio::test]
async fn test_mdq_not_found_and_errors() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entities/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = mdq_resolver(&server).await?;

    assert!(resolver
        .resolve(&CriteriaSet::entity_id("https://unknown.example.org"))
        .await?
        .is_empty());
    assert!(resolver.resolve(&CriteriaSet::entity_id("broken")).await?.is_empty());
    assert!(resolver.cached_entity_ids().is_empty());

    let summary = resolver.cleanup().await;
    assert_eq!(summary.orphaned, 2);
    assert_eq!(resolver.management_entry_count(), 0);

    resolver.destroy().await;
    Ok(())
}
