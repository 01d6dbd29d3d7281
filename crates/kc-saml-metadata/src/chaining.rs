//! Ordered, replaceable chain of resolvers.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::criteria::CriteriaSet;
use crate::document::EntityDescriptor;
use crate::error::ResolverResult;
use crate::resolver::MetadataResolver;

type Members = Vec<Arc<dyn MetadataResolver>>;

/// Returns the result of the first member that knows the entity.
///
/// The member list can be swapped at runtime; a lookup in progress keeps the
/// list it started with. `initialize()` and `destroy()` are forwarded to every
/// member.
pub struct ChainingMetadataResolver {
    id: String,
    members: ArcSwap<Members>,
}

impl std::fmt::Debug for ChainingMetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members = self.members.load();
        let ids: Vec<&str> = members.iter().map(|m| m.id()).collect();
        f.debug_struct("ChainingMetadataResolver")
            .field("id", &self.id)
            .field("members", &ids)
            .finish()
    }
}

impl ChainingMetadataResolver {
    /// Creates a chain over `members`, queried in the given order.
    #[must_use]
    pub fn new(id: impl Into<String>, members: Members) -> Self {
        Self {
            id: id.into(),
            members: ArcSwap::from_pointee(members),
        }
    }

    /// Replaces the member list.
    pub fn set_members(&self, members: Members) {
        info!(resolver = %self.id, members = members.len(), "resolver chain replaced");
        self.members.store(Arc::new(members));
    }

    /// Returns a snapshot of the member list.
    #[must_use]
    pub fn members(&self) -> Arc<Members> {
        self.members.load_full()
    }
}

#[async_trait]
impl MetadataResolver for ChainingMetadataResolver {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, criteria: &CriteriaSet) -> ResolverResult<Vec<Arc<EntityDescriptor>>> {
        criteria.require_entity_id()?;

        let members = self.members.load_full();
        for member in members.iter() {
            match member.resolve(criteria).await {
                Ok(descriptors) if !descriptors.is_empty() => {
                    debug!(resolver = %self.id, member = %member.id(), "resolved by chain member");
                    return Ok(descriptors);
                }
                Ok(_) => {}
                Err(err) => warn!(
                    resolver = %self.id,
                    member = %member.id(),
                    error = %err,
                    "chain member failed, trying next"
                ),
            }
        }
        Ok(Vec::new())
    }

    async fn resolve_single(
        &self,
        criteria: &CriteriaSet,
    ) -> ResolverResult<Option<Arc<EntityDescriptor>>> {
        criteria.require_entity_id()?;

        let members = self.members.load_full();
        for member in members.iter() {
            match member.resolve_single(criteria).await {
                Ok(Some(descriptor)) => return Ok(Some(descriptor)),
                Ok(None) => {}
                Err(err) => warn!(
                    resolver = %self.id,
                    member = %member.id(),
                    error = %err,
                    "chain member failed, trying next"
                ),
            }
        }
        Ok(None)
    }

    /// Initializes every member, stopping at the first failure.
    async fn initialize(&self) -> ResolverResult<()> {
        let members = self.members.load_full();
        for member in members.iter() {
            member.initialize().await?;
        }
        Ok(())
    }

    async fn destroy(&self) {
        let members = self.members.load_full();
        for member in members.iter() {
            member.destroy().await;
        }
    }

    fn is_initialized(&self) -> bool {
        self.members.load().iter().all(|m| m.is_initialized())
    }
}
