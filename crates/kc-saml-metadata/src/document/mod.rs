//! SAML metadata document model.
//!
//! Only the parts of a metadata tree the resolvers consume are modelled:
//! entity identifiers, role descriptors, and the `validUntil` /
//! `cacheDuration` attributes that drive refresh scheduling. The raw bytes a
//! document was parsed from are retained so it can be persisted verbatim.

mod entity;
mod parser;
mod writer;
mod xsd;

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use entity::{EntitiesDescriptor, EntityDescriptor, EntityRole, MetadataNode, RoleDescriptor};
pub use xsd::{parse_date_time, parse_duration};

use crate::time::add_duration;
use entity::earliest;

/// SAML 2.0 metadata namespace URI.
pub const METADATA_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";

/// Errors raised while parsing or serializing a metadata document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Malformed XML.
    #[error("malformed XML: {0}")]
    Xml(String),

    /// Well-formed XML that is not a metadata document.
    #[error("not a metadata document: {0}")]
    NotMetadata(String),

    /// A required attribute is absent.
    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Element local name.
        element: &'static str,
        /// Attribute name.
        attribute: &'static str,
    },

    /// Invalid `xs:dateTime` value.
    #[error("invalid dateTime: {0}")]
    InvalidDateTime(String),

    /// Invalid `xs:duration` value.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

impl From<quick_xml::Error> for DocumentError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for DocumentError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.to_string())
    }
}

/// Cache-lifetime attributes aggregated over a metadata tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpiryHint {
    /// Earliest `validUntil` anywhere in the tree.
    pub valid_until: Option<DateTime<Utc>>,
    /// Shortest `cacheDuration` anywhere in the tree.
    pub cache_duration: Option<Duration>,
}

impl ExpiryHint {
    /// Computes the expiration instant relative to `now`.
    ///
    /// The result is the earliest of `default`, `validUntil`, and
    /// `now + cacheDuration`.
    #[must_use]
    pub fn expiration(&self, now: DateTime<Utc>, default: DateTime<Utc>) -> DateTime<Utc> {
        let mut expiration = default;
        if let Some(valid_until) = self.valid_until {
            expiration = expiration.min(valid_until);
        }
        if let Some(cache_duration) = self.cache_duration {
            expiration = expiration.min(add_duration(now, cache_duration));
        }
        expiration
    }

    fn merge_valid_until(&mut self, valid_until: Option<DateTime<Utc>>) {
        self.valid_until = earliest(self.valid_until, valid_until);
    }

    fn merge_cache_duration(&mut self, cache_duration: Option<Duration>) {
        self.cache_duration = match (self.cache_duration, cache_duration) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

/// A parsed metadata document (`EntityDescriptor` or `EntitiesDescriptor` root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDocument {
    root: MetadataNode,
    raw: Option<Bytes>,
}

impl MetadataDocument {
    /// Parses metadata bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML, a root element other than
    /// `EntityDescriptor`/`EntitiesDescriptor`, or invalid attribute values.
    pub fn parse(raw: impl Into<Bytes>) -> Result<Self, DocumentError> {
        let raw = raw.into();
        let root = parser::parse_tree(&raw)?;
        Ok(Self {
            root,
            raw: Some(raw),
        })
    }

    /// Builds a document from an in-memory tree.
    #[must_use]
    pub const fn from_root(root: MetadataNode) -> Self {
        Self { root, raw: None }
    }

    /// Returns the root node.
    #[must_use]
    pub const fn root(&self) -> &MetadataNode {
        &self.root
    }

    /// Returns the bytes the document was parsed from, if it has not been
    /// modified since.
    #[must_use]
    pub fn raw(&self) -> Option<&Bytes> {
        self.raw.as_ref()
    }

    /// Serializes the document.
    ///
    /// Returns the original bytes when available, otherwise writes the tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the XML writer fails.
    pub fn serialize(&self) -> Result<Bytes, DocumentError> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => writer::write_document(&self.root).map(Bytes::from),
        }
    }

    /// Counts the entities in the document.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.root.entity_count()
    }

    /// Checks the root element has not passed its `validUntil`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.root.valid_until().is_none_or(|until| until > now)
    }

    /// Aggregates `validUntil` and `cacheDuration` over the whole tree.
    #[must_use]
    pub fn expiry_hint(&self) -> ExpiryHint {
        let mut hint = ExpiryHint::default();
        collect_expiry(&self.root, &mut hint);
        hint
    }

    /// Computes the document's expiration relative to `now`.
    #[must_use]
    pub fn expiration(&self, now: DateTime<Utc>, default: DateTime<Utc>) -> DateTime<Utc> {
        self.expiry_hint().expiration(now, default)
    }

    /// Flattens the tree into its entities in document order.
    ///
    /// Each entity's `validUntil` is tightened by those of its enclosing
    /// containers.
    #[must_use]
    pub fn into_entities(self) -> Vec<EntityDescriptor> {
        let mut entities = Vec::with_capacity(self.root.entity_count());
        flatten(self.root, None, &mut entities);
        entities
    }

    /// Applies `f` to every entity, dropping those for which it returns
    /// `false` and pruning containers left empty.
    ///
    /// Returns `None` when the root itself is a dropped entity. The raw bytes
    /// are discarded since they no longer describe the tree.
    #[must_use]
    pub fn retain_entities<F>(self, mut f: F) -> Option<Self>
    where
        F: FnMut(&mut EntityDescriptor) -> bool,
    {
        let root = match self.root {
            MetadataNode::Entity(mut entity) => f(&mut entity).then_some(MetadataNode::Entity(entity))?,
            MetadataNode::Entities(mut group) => {
                retain_in_group(&mut group, &mut f);
                MetadataNode::Entities(group)
            }
        };
        Some(Self::from_root(root))
    }
}

fn collect_expiry(node: &MetadataNode, hint: &mut ExpiryHint) {
    match node {
        MetadataNode::Entity(entity) => {
            hint.merge_valid_until(entity.valid_until);
            hint.merge_cache_duration(entity.cache_duration);
            for role in &entity.roles {
                hint.merge_valid_until(role.valid_until);
            }
        }
        MetadataNode::Entities(group) => {
            hint.merge_valid_until(group.valid_until);
            hint.merge_cache_duration(group.cache_duration);
            for member in &group.members {
                collect_expiry(member, hint);
            }
        }
    }
}

fn flatten(
    node: MetadataNode,
    inherited: Option<DateTime<Utc>>,
    out: &mut Vec<EntityDescriptor>,
) {
    match node {
        MetadataNode::Entity(entity) => out.push(entity.with_inherited_validity(inherited)),
        MetadataNode::Entities(group) => {
            let inherited = earliest(inherited, group.valid_until);
            for member in group.members {
                flatten(member, inherited, out);
            }
        }
    }
}

fn retain_in_group<F>(group: &mut EntitiesDescriptor, f: &mut F)
where
    F: FnMut(&mut EntityDescriptor) -> bool,
{
    group.members.retain_mut(|member| match member {
        MetadataNode::Entity(entity) => f(entity),
        MetadataNode::Entities(nested) => {
            retain_in_group(nested, f);
            !nested.members.is_empty()
        }
    });
}
