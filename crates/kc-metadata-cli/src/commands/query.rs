//! `query` command.

use std::sync::Arc;

use kc_saml_metadata::{
    DynamicMetadataResolver, HttpDynamicOrigin, MetadataResolver, RequestUrlBuilder,
};

use super::output_entities;
use crate::cli::QueryArgs;
use crate::config::OutputFormat;
use crate::{CliConfig, CliError, CliResult};

/// Runs the `query` command.
pub async fn run_query(args: QueryArgs, config: &CliConfig, format: OutputFormat) -> CliResult<()> {
    let url_builder = match (args.mdq, args.template) {
        (Some(base_url), None) => RequestUrlBuilder::MetadataQueryProtocol { base_url },
        (None, Some(template)) => RequestUrlBuilder::Template { template },
        (None, None) => RequestUrlBuilder::WellKnownLocation,
        (Some(_), Some(_)) => {
            return Err(CliError::InvalidArgument(
                "--mdq and --template are mutually exclusive".to_string(),
            ))
        }
    };

    let mut origin = HttpDynamicOrigin::new(url_builder)?.with_timeout(config.http.timeout());
    if let Some(accept) = &config.http.accept {
        origin = origin.with_accept(accept.clone());
    }
    if let Some(credentials) = &config.http.credentials {
        origin = origin.with_credentials(credentials.clone());
    }

    let resolver = DynamicMetadataResolver::builder("kc-metadata", Arc::new(origin))
        .config(config.dynamic.clone())
        .build()?;
    resolver.initialize().await?;

    let result = resolver.resolve(&args.criteria.to_criteria()).await;
    resolver.destroy().await;
    output_entities(&result?, format)
}
