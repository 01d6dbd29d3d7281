//! Lookup criteria.

use crate::document::{EntityDescriptor, EntityRole};
use crate::error::{ResolverError, ResolverResult};

/// Criteria for a metadata lookup.
///
/// The entity ID is required by every resolver; role and protocol narrow the
/// result to descriptors that carry a matching role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaSet {
    /// Requested `entityID`.
    pub entity_id: Option<String>,
    /// Required role.
    pub role: Option<EntityRole>,
    /// Required protocol (only checked together with `role`).
    pub protocol: Option<String>,
}

impl CriteriaSet {
    /// Creates criteria for a single entity ID.
    #[must_use]
    pub fn entity_id(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    /// Adds a role criterion.
    #[must_use]
    pub fn with_role(mut self, role: EntityRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Adds a protocol criterion.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Returns the entity ID.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::MissingCriterion`] if no entity ID was given.
    pub fn require_entity_id(&self) -> ResolverResult<&str> {
        self.entity_id
            .as_deref()
            .ok_or(ResolverError::MissingCriterion("entityID"))
    }

    /// Checks the descriptor satisfies the role and protocol criteria.
    #[must_use]
    pub fn matches(&self, entity: &EntityDescriptor) -> bool {
        let Some(role) = &self.role else {
            return true;
        };
        let mut roles = entity.roles_of(role);
        match &self.protocol {
            Some(protocol) => roles.any(|r| r.supports_protocol(protocol)),
            None => roles.next().is_some(),
        }
    }
}
