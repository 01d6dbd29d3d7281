//! `watch` command.

use std::time::Duration;

use colored::Colorize;
use kc_saml_metadata::{MetadataResolver, RefreshStatus, RefreshableMetadataResolver};

use super::reloading_resolver;
use crate::cli::WatchArgs;
use crate::config::OutputFormat;
use crate::output::{display_time, info, success, warning};
use crate::{CliConfig, CliResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Runs the `watch` command.
pub async fn run_watch(args: WatchArgs, config: &CliConfig, format: OutputFormat) -> CliResult<()> {
    let resolver = reloading_resolver("kc-metadata-watch", &args.origin, config)?;
    resolver.initialize().await?;

    let result = tokio::select! {
        result = watch(resolver.as_ref(), &args, format) => result,
        _ = tokio::signal::ctrl_c() => {
            info("interrupted");
            Ok(())
        }
    };
    resolver.destroy().await;
    result
}

async fn watch(
    resolver: &dyn RefreshableMetadataResolver,
    args: &WatchArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let mut status = resolver.refresh_status();
    report(&status, format)?;

    for _ in 1..args.cycles {
        match args.interval_secs {
            Some(secs) => {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                if let Err(err) = resolver.refresh().await {
                    warning(&format!("refresh failed: {err}"));
                }
            }
            None => {
                let seen = status.refresh_count;
                while resolver.refresh_status().refresh_count == seen {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        status = resolver.refresh_status();
        report(&status, format)?;
    }
    if format == OutputFormat::Table {
        success(&format!("observed {} refresh cycles", args.cycles));
    }
    Ok(())
}

fn report(status: &RefreshStatus, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(status)?),
        OutputFormat::Table => {
            let outcome = if status.was_last_refresh_success {
                "ok".green().bold()
            } else {
                "failed".red().bold()
            };
            println!(
                "cycle {} {} updated {} expires {} next in {}s ({})",
                status.refresh_count,
                outcome,
                display_time(status.last_update),
                display_time(status.expiration_time),
                status.next_refresh_delay.as_secs(),
                display_time(status.next_refresh),
            );
            if let Some(cause) = &status.last_failure_cause {
                warning(cause);
            }
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}
