//! Metadata filters.
//!
//! Filters run on every newly loaded document before it is indexed. A filter
//! may rewrite the document, drop it entirely (`Ok(None)`), or reject it,
//! which fails the whole load and leaves the previous store in effect.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::document::{EntityRole, MetadataDocument};
use crate::time::add_duration;

/// Result type for filter operations.
pub type FilterResult = Result<Option<MetadataDocument>, FilterError>;

/// Errors raised by metadata filters.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The filter rejected the document.
    #[error("{filter} rejected metadata: {reason}")]
    Rejected {
        /// Name of the rejecting filter.
        filter: &'static str,
        /// Why the document was rejected.
        reason: String,
    },
}

impl FilterError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(filter: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            filter,
            reason: reason.into(),
        }
    }
}

/// A transform applied to each loaded metadata document.
pub trait MetadataFilter: Send + Sync {
    /// Returns the filter name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Filters the document.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] to reject the document.
    fn filter(&self, document: MetadataDocument) -> FilterResult;
}

// ============================================================================
// Filter Chain
// ============================================================================

/// Applies filters in order, stopping once one drops the document.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn MetadataFilter>>,
}

impl FilterChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter.
    #[must_use]
    pub fn with(mut self, filter: impl MetadataFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Returns the number of filters in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Checks if the chain has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}

impl MetadataFilter for FilterChain {
    fn name(&self) -> &'static str {
        "FilterChain"
    }

    fn filter(&self, document: MetadataDocument) -> FilterResult {
        let mut current = document;
        for filter in &self.filters {
            match filter.filter(current)? {
                Some(next) => current = next,
                None => {
                    tracing::debug!(filter = filter.name(), "filter dropped metadata document");
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }
}

// ============================================================================
// Stock Filters
// ============================================================================

/// Requires a root `validUntil`, optionally no further away than a maximum
/// validity interval.
#[derive(Debug, Clone, Default)]
pub struct RequiredValidUntilFilter {
    max_validity_interval: Option<Duration>,
}

impl RequiredValidUntilFilter {
    /// Creates a filter that only requires `validUntil` to be present.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_validity_interval: None,
        }
    }

    /// Sets the maximum allowed distance between now and `validUntil`.
    #[must_use]
    pub const fn with_max_validity_interval(mut self, interval: Duration) -> Self {
        self.max_validity_interval = Some(interval);
        self
    }
}

impl MetadataFilter for RequiredValidUntilFilter {
    fn name(&self) -> &'static str {
        "RequiredValidUntilFilter"
    }

    fn filter(&self, document: MetadataDocument) -> FilterResult {
        let Some(valid_until) = document.root().valid_until() else {
            return Err(FilterError::rejected(
                self.name(),
                "root element has no validUntil",
            ));
        };

        if let Some(max) = self.max_validity_interval {
            let limit = add_duration(Utc::now(), max);
            if valid_until > limit {
                return Err(FilterError::rejected(
                    self.name(),
                    format!("validUntil {valid_until} is further away than {max:?}"),
                ));
            }
        }

        Ok(Some(document))
    }
}

/// Keeps only the listed role descriptors.
///
/// Entities left without any role are removed unless
/// `remove_roleless_entities` is turned off.
#[derive(Debug, Clone)]
pub struct EntityRoleFilter {
    roles: Vec<EntityRole>,
    remove_roleless_entities: bool,
}

impl EntityRoleFilter {
    /// Creates a filter retaining the given roles.
    #[must_use]
    pub fn new(roles: impl IntoIterator<Item = EntityRole>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
            remove_roleless_entities: true,
        }
    }

    /// Sets whether entities without remaining roles are dropped.
    #[must_use]
    pub const fn with_remove_roleless_entities(mut self, remove: bool) -> Self {
        self.remove_roleless_entities = remove;
        self
    }
}

impl MetadataFilter for EntityRoleFilter {
    fn name(&self) -> &'static str {
        "EntityRoleFilter"
    }

    fn filter(&self, document: MetadataDocument) -> FilterResult {
        Ok(document.retain_entities(|entity| {
            entity.roles.retain(|role| self.roles.contains(&role.role));
            !(self.remove_roleless_entities && entity.roles.is_empty())
        }))
    }
}

/// Whether an [`EntityIdPredicateFilter`] lists entities to keep or to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateMode {
    /// Keep only listed entities.
    Include,
    /// Drop listed entities.
    Exclude,
}

/// Keeps or drops entities by `entityID`.
#[derive(Debug, Clone)]
pub struct EntityIdPredicateFilter {
    mode: PredicateMode,
    entity_ids: HashSet<String>,
}

impl EntityIdPredicateFilter {
    /// Keeps only the given entities.
    #[must_use]
    pub fn include(entity_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode: PredicateMode::Include,
            entity_ids: entity_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Drops the given entities.
    #[must_use]
    pub fn exclude(entity_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode: PredicateMode::Exclude,
            entity_ids: entity_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the filter mode.
    #[must_use]
    pub const fn mode(&self) -> PredicateMode {
        self.mode
    }
}

impl MetadataFilter for EntityIdPredicateFilter {
    fn name(&self) -> &'static str {
        "EntityIdPredicateFilter"
    }

    fn filter(&self, document: MetadataDocument) -> FilterResult {
        Ok(document.retain_entities(|entity| {
            let listed = self.entity_ids.contains(&entity.entity_id);
            match self.mode {
                PredicateMode::Include => listed,
                PredicateMode::Exclude => !listed,
            }
        }))
    }
}
