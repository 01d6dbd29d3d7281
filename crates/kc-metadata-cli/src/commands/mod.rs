//! Command implementations.

pub mod inspect;
pub mod query;
pub mod resolve;
pub mod watch;

pub use inspect::run_inspect;
pub use query::run_query;
pub use resolve::run_resolve;
pub use watch::run_watch;

use std::sync::Arc;

use kc_saml_metadata::{
    CriteriaSet, EntityDescriptor, FileBackedConfig, FileBackedHttpMetadataResolver,
    FileBackedHttpMetadataSource, HttpMetadataResolver, HttpMetadataSource,
    RefreshableMetadataResolver,
};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{CriteriaArgs, OriginArgs};
use crate::config::OutputFormat;
use crate::output::{display_time, output, Identified};
use crate::{CliConfig, CliResult};

/// Entity representation for display.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct EntityRow {
    /// Entity ID.
    #[tabled(rename = "Entity ID")]
    pub entity_id: String,
    /// Role element names.
    #[tabled(rename = "Roles")]
    pub roles: String,
    /// Effective `validUntil`.
    #[tabled(rename = "Valid Until")]
    pub valid_until: String,
    /// Organization display name.
    #[tabled(rename = "Organization")]
    pub organization: String,
}

impl From<&EntityDescriptor> for EntityRow {
    fn from(entity: &EntityDescriptor) -> Self {
        let roles: Vec<&str> = entity.roles.iter().map(|r| r.role.element_name()).collect();
        Self {
            entity_id: entity.entity_id.clone(),
            roles: roles.join(", "),
            valid_until: display_time(entity.valid_until),
            organization: entity.organization_name.clone().unwrap_or_default(),
        }
    }
}

impl Identified for EntityRow {
    fn identifier(&self) -> &str {
        &self.entity_id
    }
}

impl CriteriaArgs {
    /// Builds the lookup criteria.
    pub fn to_criteria(&self) -> CriteriaSet {
        let mut criteria = CriteriaSet::entity_id(&self.entity_id);
        if let Some(role) = &self.role {
            criteria = criteria.with_role(role.clone());
        }
        if let Some(protocol) = &self.protocol {
            criteria = criteria.with_protocol(protocol);
        }
        criteria
    }
}

/// Prints resolved descriptors. JSON output carries the full descriptors.
pub fn output_entities(
    descriptors: &[Arc<EntityDescriptor>],
    format: OutputFormat,
) -> CliResult<()> {
    if format == OutputFormat::Json {
        let entities: Vec<&EntityDescriptor> = descriptors.iter().map(AsRef::as_ref).collect();
        println!("{}", serde_json::to_string_pretty(&entities)?);
        return Ok(());
    }
    let rows: Vec<EntityRow> = descriptors.iter().map(|d| EntityRow::from(d.as_ref())).collect();
    output(&rows, format)
}

/// Builds an HTTP resolver, file-backed when a backup file is given.
pub fn reloading_resolver(
    id: &str,
    origin: &OriginArgs,
    config: &CliConfig,
) -> CliResult<Box<dyn RefreshableMetadataResolver>> {
    let http = HttpMetadataSource::new(config.http.source_config(&origin.url))?;

    let resolver: Box<dyn RefreshableMetadataResolver> = match &origin.backup_file {
        Some(backup) => {
            let source = FileBackedHttpMetadataSource::new(http, FileBackedConfig::new(backup))?;
            Box::new(
                FileBackedHttpMetadataResolver::builder(id, source)
                    .config(config.reloading.clone())
                    .build()?,
            )
        }
        None => Box::new(
            HttpMetadataResolver::builder(id, http)
                .config(config.reloading.clone())
                .build()?,
        ),
    };
    Ok(resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_saml_metadata::{EntityRole, RoleDescriptor};

    #[test]
    fn entity_row_lists_roles() {
        let entity = EntityDescriptor::new("https://idp.example.org")
            .with_role(RoleDescriptor::new(EntityRole::IdpSso, ["urn:oasis:names:tc:SAML:2.0:protocol"]))
            .with_role(RoleDescriptor::new(EntityRole::AttributeAuthority, ["urn:oasis:names:tc:SAML:2.0:protocol"]));
        let row = EntityRow::from(&entity);
        assert_eq!(row.roles, "IDPSSODescriptor, AttributeAuthorityDescriptor");
        assert_eq!(row.valid_until, "-");
    }

    #[test]
    fn criteria_from_args() {
        let args = CriteriaArgs {
            entity_id: "https://sp.example.org".to_string(),
            role: Some(EntityRole::SpSso),
            protocol: None,
        };
        let criteria = args.to_criteria();
        assert_eq!(criteria.entity_id.as_deref(), Some("https://sp.example.org"));
        assert_eq!(criteria.role, Some(EntityRole::SpSso));
    }

    #[test]
    fn rejects_non_http_origin() {
        let origin = OriginArgs {
            url: "ftp://md.example.org/md.xml".to_string(),
            backup_file: None,
        };
        assert!(reloading_resolver("test", &origin, &CliConfig::default()).is_err());
    }
}
