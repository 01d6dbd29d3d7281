//! # Keycloak Metadata CLI
//!
//! Command-line tools for SAML federation metadata.

#![forbid(unsafe_code)]

use clap::Parser;
use kc_metadata_cli::{
    cli::{Cli, Command},
    commands::{run_inspect, run_query, run_resolve, run_watch},
    config::CliConfig,
    output::error,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "kc_saml_metadata=debug,kc_metadata_cli=debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match CliConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error(&format!("Failed to load configuration: {}", e));
            std::process::exit(1);
        }
    };
    let format = cli.output.unwrap_or(config.output_format);
    tracing::debug!(config = ?cli.config, format = ?format, "configuration loaded");

    let result = match cli.command {
        Command::Inspect(args) => run_inspect(args, &config, format).await,
        Command::Resolve(args) => run_resolve(args, &config, format).await,
        Command::Query(args) => run_query(args, &config, format).await,
        Command::Watch(args) => run_watch(args, &config, format).await,
    };

    if let Err(e) = result {
        error(&e.to_string());
        std::process::exit(1);
    }
}
