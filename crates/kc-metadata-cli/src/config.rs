//! CLI configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kc_saml_metadata::{
    BasicCredentials, DynamicConfig, HttpSourceConfig, ReloadingConfig,
};
use serde::{Deserialize, Serialize};

use crate::{CliError, CliResult};

/// CLI configuration, read from `~/.keycloak/kc-metadata.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,

    /// HTTP defaults for metadata origins.
    #[serde(default)]
    pub http: HttpDefaults,

    /// Settings for reloading resolvers (`resolve`, `watch`).
    #[serde(default)]
    pub reloading: ReloadingConfig,

    /// Settings for the dynamic resolver (`query`).
    #[serde(default)]
    pub dynamic: DynamicConfig,
}

/// HTTP settings applied to every origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpDefaults {
    /// `Accept` header override.
    pub accept: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// BASIC credentials.
    pub credentials: Option<BasicCredentials>,
}

impl Default for HttpDefaults {
    fn default() -> Self {
        Self {
            accept: None,
            timeout_secs: 30,
            credentials: None,
        }
    }
}

impl HttpDefaults {
    /// Returns the request timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Builds a source config for `url` with these defaults.
    pub fn source_config(&self, url: &str) -> HttpSourceConfig {
        let mut config = HttpSourceConfig::new(url).with_timeout(self.timeout());
        if let Some(accept) = &self.accept {
            config = config.with_accept(accept.clone());
        }
        config.credentials = self.credentials.clone();
        config
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let (config_path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::config_path()?, false),
        };

        if !config_path.exists() {
            if required {
                return Err(CliError::Config(format!(
                    "config file {} does not exist",
                    config_path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::parse(&content)
    }

    /// Parses TOML configuration.
    pub fn parse(content: &str) -> CliResult<Self> {
        toml::from_str(content)
            .map_err(|e| CliError::Config(format!("failed to parse config: {e}")))
    }

    /// Gets the default configuration file path.
    pub fn config_path() -> CliResult<PathBuf> {
        let home = dirs_next::home_dir()
            .ok_or_else(|| CliError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".keycloak").join("kc-metadata.toml"))
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
    /// Quiet (entity IDs only).
    Quiet,
}
