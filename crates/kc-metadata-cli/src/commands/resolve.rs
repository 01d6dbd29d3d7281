//! `resolve` command.

use kc_saml_metadata::MetadataResolver;

use crate::cli::ResolveArgs;
use crate::config::OutputFormat;
use crate::CliConfig;

use super::{output_entities, reloading_resolver};

/// Runs the `resolve` command.
pub async fn run_resolve(
    args: ResolveArgs,
    config: &CliConfig,
    format: OutputFormat,
) -> crate::CliResult<()> {
    let resolver = reloading_resolver("kc-metadata", &args.origin, config)?;
    resolver.initialize().await?;

    let result = resolver.resolve(&args.criteria.to_criteria()).await;
    resolver.destroy().await;
    output_entities(&result?, format)
}
