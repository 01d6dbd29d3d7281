//! `inspect` command.

use chrono::Utc;
use kc_saml_metadata::config::DEFAULT_ACCEPT;
use kc_saml_metadata::MetadataDocument;
use reqwest::header::ACCEPT;

use super::EntityRow;
use crate::cli::InspectArgs;
use crate::config::OutputFormat;
use crate::output::{display_time, info, output, warning};
use crate::{CliConfig, CliError, CliResult};

/// Runs the `inspect` command.
pub async fn run_inspect(
    args: InspectArgs,
    config: &CliConfig,
    format: OutputFormat,
) -> CliResult<()> {
    let raw = load(&args.source, config).await?;
    let document = MetadataDocument::parse(raw)?;

    let now = Utc::now();
    let valid = document.is_valid(now);
    let hint = document.expiry_hint();
    let rows: Vec<EntityRow> = document.into_entities().iter().map(EntityRow::from).collect();
    output(&rows, format)?;

    if format == OutputFormat::Table {
        let cache_duration = hint
            .cache_duration
            .map_or_else(|| "-".to_string(), |d| format!("{}s", d.as_secs()));
        info(&format!(
            "{} entities, validUntil {}, cacheDuration {}",
            rows.len(),
            display_time(hint.valid_until),
            cache_duration
        ));
        if !valid {
            warning("document has expired");
        }
    }
    Ok(())
}

/// Reads a metadata document from a file or an http(s) URL.
async fn load(source: &str, config: &CliConfig) -> CliResult<Vec<u8>> {
    if !(source.starts_with("http://") || source.starts_with("https://")) {
        return Ok(tokio::fs::read(source).await?);
    }

    let client = reqwest::Client::builder()
        .timeout(config.http.timeout())
        .build()?;
    let accept = config.http.accept.as_deref().unwrap_or(DEFAULT_ACCEPT);
    let mut request = client.get(source).header(ACCEPT, accept);
    if let Some(credentials) = &config.http.credentials {
        request = request.basic_auth(&credentials.username, Some(&credentials.password));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::HttpStatus {
            status: status.as_u16(),
            url: source.to_string(),
        });
    }
    Ok(response.bytes().await?.to_vec())
}
