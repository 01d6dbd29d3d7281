//! Resolver traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::criteria::CriteriaSet;
use crate::document::EntityDescriptor;
use crate::error::ResolverResult;
use crate::schedule::RefreshStatus;

/// Answers criteria-based metadata lookups.
///
/// A miss is an empty result, never an error. Errors are reserved for
/// lifecycle misuse and a missing entity-ID criterion.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Returns the resolver identifier used in logs.
    fn id(&self) -> &str;

    /// Returns every descriptor matching the criteria.
    async fn resolve(&self, criteria: &CriteriaSet) -> ResolverResult<Vec<Arc<EntityDescriptor>>>;

    /// Returns the first descriptor matching the criteria.
    async fn resolve_single(
        &self,
        criteria: &CriteriaSet,
    ) -> ResolverResult<Option<Arc<EntityDescriptor>>> {
        Ok(self.resolve(criteria).await?.into_iter().next())
    }

    /// Prepares the resolver for lookups. Idempotent.
    async fn initialize(&self) -> ResolverResult<()>;

    /// Releases background tasks and cached data. Idempotent.
    async fn destroy(&self);

    /// Checks if the resolver is serving lookups.
    fn is_initialized(&self) -> bool;
}

/// A resolver whose data can be refreshed on demand.
#[async_trait]
pub trait RefreshableMetadataResolver: MetadataResolver {
    /// Runs one refresh cycle now.
    async fn refresh(&self) -> ResolverResult<()>;

    /// Returns a snapshot of the refresh schedule.
    fn refresh_status(&self) -> RefreshStatus;
}
