//! Fan-out over a fixed list of resolvers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::criteria::CriteriaSet;
use crate::document::EntityDescriptor;
use crate::error::ResolverResult;
use crate::resolver::MetadataResolver;

/// Queries every child in order and concatenates their results.
///
/// Children that fail are logged and skipped. Lifecycle calls are not
/// forwarded; children are managed by their owner.
pub struct CompositeMetadataResolver {
    id: String,
    resolvers: Vec<Arc<dyn MetadataResolver>>,
}

impl std::fmt::Debug for CompositeMetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.resolvers.iter().map(|r| r.id()).collect();
        f.debug_struct("CompositeMetadataResolver")
            .field("id", &self.id)
            .field("resolvers", &ids)
            .finish()
    }
}

impl CompositeMetadataResolver {
    /// Creates a composite over `resolvers`, queried in the given order.
    #[must_use]
    pub fn new(id: impl Into<String>, resolvers: Vec<Arc<dyn MetadataResolver>>) -> Self {
        Self {
            id: id.into(),
            resolvers,
        }
    }

    /// Returns the children.
    #[must_use]
    pub fn resolvers(&self) -> &[Arc<dyn MetadataResolver>] {
        &self.resolvers
    }
}

#[async_trait]
impl MetadataResolver for CompositeMetadataResolver {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, criteria: &CriteriaSet) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        criteria.require_entity_id()?;

        let mut resolved = Vec::new();
        for child in &self.resolvers {
            match child.resolve(criteria).await {
                Ok(descriptors) => resolved.extend(descriptors),
                Err(err) => warn!(
                    resolver = %self.id,
                    child = %child.id(),
                    error = %err,
                    "child resolver failed, skipping"
                ),
            }
        }
        Ok(resolved)
    }

    async fn resolve_single(
        &self,
        criteria: &CriteriaSet,
    ) -> ResolverResult<Option<Arc<EntityDescriptor>>> {
        criteria.require_entity_id()?;

        for child in &self.resolvers {
            match child.resolve_single(criteria).await {
                Ok(Some(descriptor)) => return Ok(Some(descriptor)),
                Ok(None) => {}
                Err(err) => warn!(
                    resolver = %self.id,
                    child = %child.id(),
                    error = %err,
                    "child resolver failed, skipping"
                ),
            }
        }
        Ok(None)
    }

    async fn initialize(&self) -> ResolverResult<()> {
        Ok(())
    }

    async fn destroy(&self) {}

    fn is_initialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::StaticMetadataResolver;
    use crate::error::ResolverError;
    use crate::test_support::{entity_xml, federation_xml};

    async fn static_resolver(id: &str, xml: String) -> Arc<dyn MetadataResolver> {
        let resolver = StaticMetadataResolver::from_bytes(id, xml);
        resolver.initialize().await.unwrap();
        Arc::new(resolver)
    }

    #[tokio::test]
    async fn resolve_single_searches_children_in_order() {
        let empty = static_resolver("empty", federation_xml(&[])).await;
        let with_b = static_resolver("b", entity_xml("B", None)).await;
        let composite = CompositeMetadataResolver::new("composite", vec![empty, with_b]);

        let b = composite
            .resolve_single(&CriteriaSet::entity_id("B"))
            .await
            .unwrap();
        assert_eq!(b.unwrap().entity_id, "B");
        assert!(composite
            .resolve_single(&CriteriaSet::entity_id("C"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn resolve_concatenates_and_skips_failures() {
        let first = static_resolver("first", federation_xml(&["A", "B"])).await;
        let second = static_resolver("second", entity_xml("A", None)).await;
        // Never initialized, so every lookup fails.
        let broken: Arc<dyn MetadataResolver> =
            Arc::new(StaticMetadataResolver::from_bytes("broken", entity_xml("A", None)));
        let composite = CompositeMetadataResolver::new("composite", vec![first, broken, second]);

        let resolved = composite.resolve(&CriteriaSet::entity_id("A")).await.unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn requires_entity_id() {
        let composite = CompositeMetadataResolver::new("composite", Vec::new());
        assert!(matches!(
            composite.resolve(&CriteriaSet::default()).await,
            Err(ResolverError::MissingCriterion(_))
        ));
    }
}
