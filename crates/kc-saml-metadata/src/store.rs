//! Backing store generations.
//!
//! A [`BackingStore`] is built once per successful load and then published
//! behind an `ArcSwap`; it is never mutated after publication.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::criteria::CriteriaSet;
use crate::document::{EntityDescriptor, ExpiryHint, MetadataDocument};

/// An immutable index of entity descriptors.
#[derive(Debug, Default)]
pub struct BackingStore {
    indexed: HashMap<String, Vec<Arc<EntityDescriptor>>>,
    ordered: Vec<Arc<EntityDescriptor>>,
    cached_document: Option<Arc<MetadataDocument>>,
    expiry_hint: ExpiryHint,
}

impl BackingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Indexes the given entities in order.
    ///
    /// Duplicate entity IDs are kept, in document order, and logged.
    #[must_use]
    pub fn from_entities(entities: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        let mut store = Self::default();
        for entity in entities {
            store.insert(Arc::new(entity));
        }
        store
    }

    /// Sets the source document retained alongside the index.
    #[must_use]
    pub fn with_cached_document(mut self, document: Option<Arc<MetadataDocument>>) -> Self {
        self.cached_document = document;
        self
    }

    /// Sets the expiry hint of the document the store was built from.
    #[must_use]
    pub const fn with_expiry_hint(mut self, hint: ExpiryHint) -> Self {
        self.expiry_hint = hint;
        self
    }

    fn insert(&mut self, entity: Arc<EntityDescriptor>) {
        let slot = self.indexed.entry(entity.entity_id.clone()).or_default();
        if !slot.is_empty() {
            tracing::warn!(
                entity_id = %entity.entity_id,
                "duplicate entity descriptor in metadata, keeping both"
            );
        }
        slot.push(Arc::clone(&entity));
        self.ordered.push(entity);
    }

    /// Returns every descriptor indexed under `entity_id`.
    ///
    /// Empty for an unknown or empty ID.
    #[must_use]
    pub fn lookup(&self, entity_id: &str) -> &[Arc<EntityDescriptor>] {
        if entity_id.is_empty() {
            return &[];
        }
        self.indexed.get(entity_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Resolves descriptors matching the criteria.
    ///
    /// When `require_valid` is set, descriptors past their `validUntil` at
    /// `now` are withheld.
    #[must_use]
    pub fn resolve(
        &self,
        criteria: &CriteriaSet,
        require_valid: bool,
        now: DateTime<Utc>,
    ) -> Vec<Arc<EntityDescriptor>> {
        let Some(entity_id) = criteria.entity_id.as_deref() else {
            return Vec::new();
        };
        select(self.lookup(entity_id), criteria, require_valid, now)
    }

    /// Returns all descriptors in document order.
    #[must_use]
    pub fn ordered(&self) -> &[Arc<EntityDescriptor>] {
        &self.ordered
    }

    /// Returns the retained source document, if any.
    #[must_use]
    pub fn cached_document(&self) -> Option<&Arc<MetadataDocument>> {
        self.cached_document.as_ref()
    }

    /// Returns the expiry hint of the source document.
    #[must_use]
    pub const fn expiry_hint(&self) -> ExpiryHint {
        self.expiry_hint
    }

    /// Returns the number of distinct entity IDs.
    #[must_use]
    pub fn entity_id_count(&self) -> usize {
        self.indexed.len()
    }

    /// Returns the number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Checks if the store holds no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Applies role, protocol and validity criteria to candidate descriptors.
pub(crate) fn select(
    candidates: &[Arc<EntityDescriptor>],
    criteria: &CriteriaSet,
    require_valid: bool,
    now: DateTime<Utc>,
) -> Vec<Arc<EntityDescriptor>> {
    candidates
        .iter()
        .filter(|entity| !require_valid || entity.is_valid(now))
        .filter(|entity| criteria.matches(entity))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{EntityRole, RoleDescriptor};
    use chrono::TimeDelta;

    fn entity(id: &str, role: EntityRole) -> EntityDescriptor {
        EntityDescriptor::new(id).with_role(RoleDescriptor::new(
            role,
            ["urn:oasis:names:tc:SAML:2.0:protocol"],
        ))
    }

    #[test]
    fn lookup_returns_only_matching_id() {
        let store = BackingStore::from_entities([
            entity("a", EntityRole::IdpSso),
            entity("b", EntityRole::SpSso),
        ]);

        assert_eq!(store.lookup("a").len(), 1);
        assert_eq!(store.lookup("a")[0].entity_id, "a");
        assert!(store.lookup("c").is_empty());
        assert!(store.lookup("").is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn duplicates_are_appended_in_order() {
        let store = BackingStore::from_entities([
            entity("a", EntityRole::IdpSso),
            entity("a", EntityRole::SpSso),
        ]);

        let found = store.lookup("a");
        assert_eq!(found.len(), 2);
        assert!(found[0].has_role(&EntityRole::IdpSso));
        assert!(found[1].has_role(&EntityRole::SpSso));
        assert_eq!(store.entity_id_count(), 1);
    }

    #[test]
    fn resolve_applies_role_and_validity() {
        let now = Utc::now();
        let expired = entity("a", EntityRole::SpSso).with_valid_until(now - TimeDelta::minutes(1));
        let store = BackingStore::from_entities([entity("a", EntityRole::IdpSso), expired]);

        let criteria = CriteriaSet::entity_id("a");
        assert_eq!(store.resolve(&criteria, true, now).len(), 1);
        assert_eq!(store.resolve(&criteria, false, now).len(), 2);

        let sp_only = criteria.with_role(EntityRole::SpSso);
        assert!(store.resolve(&sp_only, true, now).is_empty());
        assert!(store.resolve(&CriteriaSet::default(), false, now).is_empty());
    }
}
