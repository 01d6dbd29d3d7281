//! Entity and role descriptor types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role an entity plays in the federation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRole {
    /// `IDPSSODescriptor`.
    IdpSso,
    /// `SPSSODescriptor`.
    SpSso,
    /// `AttributeAuthorityDescriptor`.
    AttributeAuthority,
    /// `AuthnAuthorityDescriptor`.
    AuthnAuthority,
    /// `PDPDescriptor`.
    Pdp,
    /// Any other role element (`RoleDescriptor` extensions), by local name.
    Other(String),
}

impl EntityRole {
    /// Maps a metadata element local name to a role.
    ///
    /// Returns `None` for names that are not role descriptors.
    #[must_use]
    pub fn from_element(local_name: &str) -> Option<Self> {
        match local_name {
            "IDPSSODescriptor" => Some(Self::IdpSso),
            "SPSSODescriptor" => Some(Self::SpSso),
            "AttributeAuthorityDescriptor" => Some(Self::AttributeAuthority),
            "AuthnAuthorityDescriptor" => Some(Self::AuthnAuthority),
            "PDPDescriptor" => Some(Self::Pdp),
            "RoleDescriptor" => Some(Self::Other(local_name.to_string())),
            _ => None,
        }
    }

    /// Returns the element local name for this role.
    #[must_use]
    pub fn element_name(&self) -> &str {
        match self {
            Self::IdpSso => "IDPSSODescriptor",
            Self::SpSso => "SPSSODescriptor",
            Self::AttributeAuthority => "AttributeAuthorityDescriptor",
            Self::AuthnAuthority => "AuthnAuthorityDescriptor",
            Self::Pdp => "PDPDescriptor",
            Self::Other(name) => name,
        }
    }
}

impl std::str::FromStr for EntityRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idp" | "idpsso" => Ok(Self::IdpSso),
            "sp" | "spsso" => Ok(Self::SpSso),
            "aa" | "attribute-authority" => Ok(Self::AttributeAuthority),
            "authn-authority" => Ok(Self::AuthnAuthority),
            "pdp" => Ok(Self::Pdp),
            _ => Self::from_element(s).ok_or_else(|| format!("unknown entity role: {s}")),
        }
    }
}

/// One role descriptor of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    /// The role.
    pub role: EntityRole,

    /// Protocol URIs from `protocolSupportEnumeration`.
    pub protocol_support: Vec<String>,

    /// Role-level `validUntil`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

impl RoleDescriptor {
    /// Creates a role descriptor supporting the given protocols.
    #[must_use]
    pub fn new(role: EntityRole, protocols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            role,
            protocol_support: protocols.into_iter().map(Into::into).collect(),
            valid_until: None,
        }
    }

    /// Checks if the role advertises the given protocol.
    #[must_use]
    pub fn supports_protocol(&self, protocol: &str) -> bool {
        self.protocol_support.iter().any(|p| p == protocol)
    }
}

/// Metadata for one federation participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// The `entityID`.
    pub entity_id: String,

    /// Effective `validUntil` (the entity's own, tightened by enclosing
    /// containers once the document is flattened).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    /// `cacheDuration`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_duration: Option<Duration>,

    /// Role descriptors in document order.
    pub roles: Vec<RoleDescriptor>,

    /// Organization display name, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
}

impl EntityDescriptor {
    /// Creates an entity descriptor with no roles.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            valid_until: None,
            cache_duration: None,
            roles: Vec::new(),
            organization_name: None,
        }
    }

    /// Sets `validUntil`.
    #[must_use]
    pub const fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    /// Adds a role descriptor.
    #[must_use]
    pub fn with_role(mut self, role: RoleDescriptor) -> Self {
        self.roles.push(role);
        self
    }

    /// Checks the entity has not passed its `validUntil`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_none_or(|until| until > now)
    }

    /// Checks the entity has a descriptor for `role`.
    #[must_use]
    pub fn has_role(&self, role: &EntityRole) -> bool {
        self.roles.iter().any(|r| &r.role == role)
    }

    /// Returns the descriptors for `role`.
    pub fn roles_of<'a>(&'a self, role: &'a EntityRole) -> impl Iterator<Item = &'a RoleDescriptor> {
        self.roles.iter().filter(move |r| &r.role == role)
    }

    /// Tightens `validUntil` to the earlier of its own and `inherited`.
    #[must_use]
    pub fn with_inherited_validity(mut self, inherited: Option<DateTime<Utc>>) -> Self {
        self.valid_until = earliest(self.valid_until, inherited);
        self
    }
}

/// A container of entities (`EntitiesDescriptor`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntitiesDescriptor {
    /// The `Name` attribute.
    pub name: Option<String>,

    /// `validUntil`.
    pub valid_until: Option<DateTime<Utc>>,

    /// `cacheDuration`.
    pub cache_duration: Option<Duration>,

    /// Child entities and nested containers in document order.
    pub members: Vec<MetadataNode>,
}

/// A node of the metadata tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataNode {
    /// A single entity.
    Entity(EntityDescriptor),
    /// A container of entities.
    Entities(EntitiesDescriptor),
}

impl MetadataNode {
    /// Returns the node's own `validUntil`.
    #[must_use]
    pub const fn valid_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Entity(entity) => entity.valid_until,
            Self::Entities(group) => group.valid_until,
        }
    }

    /// Counts the entities under this node.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        match self {
            Self::Entity(_) => 1,
            Self::Entities(group) => group.members.iter().map(Self::entity_count).sum(),
        }
    }
}

pub(crate) fn earliest(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
