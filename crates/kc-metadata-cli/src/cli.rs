//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kc_saml_metadata::EntityRole;

use crate::config::OutputFormat;

/// Keycloak metadata CLI - Inspect and resolve SAML federation metadata.
#[derive(Debug, Parser)]
#[command(name = "kc-metadata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ~/.keycloak/kc-metadata.toml).
    #[arg(short, long, env = "KC_METADATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (overrides config).
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse a metadata document and list its entities.
    Inspect(InspectArgs),

    /// Resolve an entity from a metadata URL.
    Resolve(ResolveArgs),

    /// Resolve an entity from a Metadata Query (MDQ) responder.
    Query(QueryArgs),

    /// Run a reloading resolver and report each refresh cycle.
    Watch(WatchArgs),
}

/// Lookup criteria shared by `resolve` and `query`.
#[derive(Debug, Clone, Args)]
pub struct CriteriaArgs {
    /// Entity ID to look up.
    pub entity_id: String,

    /// Required role (idp, sp, aa, authn-authority, pdp).
    #[arg(long)]
    pub role: Option<EntityRole>,

    /// Required protocol URI (with --role).
    #[arg(long, requires = "role")]
    pub protocol: Option<String>,
}

/// Where a reloading resolver fetches from.
#[derive(Debug, Clone, Args)]
pub struct OriginArgs {
    /// Metadata URL.
    #[arg(long)]
    pub url: String,

    /// Backup file kept in sync with the origin.
    #[arg(long)]
    pub backup_file: Option<PathBuf>,
}

/// `inspect` arguments.
#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Metadata file path or http(s) URL.
    pub source: String,
}

/// `resolve` arguments.
#[derive(Debug, Clone, Args)]
pub struct ResolveArgs {
    /// Lookup criteria.
    #[command(flatten)]
    pub criteria: CriteriaArgs,

    /// Metadata origin.
    #[command(flatten)]
    pub origin: OriginArgs,
}

/// `query` arguments.
#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Lookup criteria.
    #[command(flatten)]
    pub criteria: CriteriaArgs,

    /// MDQ responder base URL.
    #[arg(long, conflicts_with = "template")]
    pub mdq: Option<String>,

    /// Request URL template containing ${entityID}.
    #[arg(long)]
    pub template: Option<String>,
}

/// `watch` arguments.
#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Metadata origin.
    #[command(flatten)]
    pub origin: OriginArgs,

    /// Number of refresh cycles to report before exiting.
    #[arg(long, default_value = "3")]
    pub cycles: u32,

    /// Trigger a refresh every N seconds instead of following the schedule.
    #[arg(long)]
    pub interval_secs: Option<u64>,
}
