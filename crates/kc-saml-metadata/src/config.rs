//! Resolver configuration.
//!
//! Configuration types for the reloading, HTTP, file-backed and dynamic
//! resolvers. Durations are serialized as milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResolverError, ResolverResult};

/// Default `Accept` header sent when fetching metadata.
pub const DEFAULT_ACCEPT: &str = "application/samlmetadata+xml, application/xml, text/xml";

/// Configuration shared by all reloading (batch) resolvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadingConfig {
    /// Lower bound of the refresh delay.
    #[serde(with = "duration_ms")]
    pub min_refresh_delay: Duration,

    /// Upper bound of the refresh delay.
    #[serde(with = "duration_ms")]
    pub max_refresh_delay: Duration,

    /// Fraction of the time-to-expiry after which a refresh is attempted.
    pub refresh_delay_factor: f64,

    /// Whether an initialization failure is fatal.
    pub fail_fast_initialization: bool,

    /// Whether descriptors past their `validUntil` are withheld from results.
    pub require_valid_metadata: bool,

    /// Whether the parsed source document is retained in the backing store.
    pub cache_source_metadata: bool,
}

impl Default for ReloadingConfig {
    fn default() -> Self {
        Self {
            min_refresh_delay: Duration::from_secs(5 * 60),
            max_refresh_delay: Duration::from_secs(4 * 60 * 60),
            refresh_delay_factor: 0.75,
            fail_fast_initialization: true,
            require_valid_metadata: true,
            cache_source_metadata: true,
        }
    }
}

impl ReloadingConfig {
    /// Sets the refresh delay bounds.
    #[must_use]
    pub const fn with_refresh_delays(mut self, min: Duration, max: Duration) -> Self {
        self.min_refresh_delay = min;
        self.max_refresh_delay = max;
        self
    }

    /// Sets the refresh delay factor.
    #[must_use]
    pub const fn with_refresh_delay_factor(mut self, factor: f64) -> Self {
        self.refresh_delay_factor = factor;
        self
    }

    /// Sets whether initialization failures are fatal.
    #[must_use]
    pub const fn with_fail_fast_initialization(mut self, fail_fast: bool) -> Self {
        self.fail_fast_initialization = fail_fast;
        self
    }

    /// Sets whether expired descriptors are withheld.
    #[must_use]
    pub const fn with_require_valid_metadata(mut self, require: bool) -> Self {
        self.require_valid_metadata = require;
        self
    }

    /// Sets whether the source document is retained.
    #[must_use]
    pub const fn with_cache_source_metadata(mut self, cache: bool) -> Self {
        self.cache_source_metadata = cache;
        self
    }

    /// Validates the refresh delay policy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for zero delays, `min > max`, or a
    /// factor outside `(0, 1)`.
    pub fn validate(&self) -> ResolverResult<()> {
        if self.min_refresh_delay.is_zero() || self.max_refresh_delay.is_zero() {
            return Err(ResolverError::config("refresh delays must be greater than zero"));
        }
        if self.min_refresh_delay > self.max_refresh_delay {
            return Err(ResolverError::config(format!(
                "minimum refresh delay {:?} exceeds maximum refresh delay {:?}",
                self.min_refresh_delay, self.max_refresh_delay
            )));
        }
        validate_factor(self.refresh_delay_factor)
    }
}

/// HTTP BASIC credentials for a metadata origin.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for an HTTP metadata source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Metadata URL.
    pub url: String,

    /// `Accept` header value.
    #[serde(default = "default_accept")]
    pub accept: String,

    /// Request timeout.
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,

    /// Optional BASIC credentials.
    #[serde(default)]
    pub credentials: Option<BasicCredentials>,
}

fn default_accept() -> String {
    DEFAULT_ACCEPT.to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl HttpSourceConfig {
    /// Creates a config for the given URL with default headers and timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            accept: default_accept(),
            timeout: default_timeout(),
            credentials: None,
        }
    }

    /// Sets the `Accept` header value.
    #[must_use]
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets BASIC credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(BasicCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

/// Configuration for the on-disk backup of a file-backed HTTP source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBackedConfig {
    /// Path of the backup file.
    pub backup_file: PathBuf,

    /// Whether the first load is served from an existing backup file.
    #[serde(default = "default_true")]
    pub initialize_from_backup_file: bool,

    /// Delay before contacting the origin after a backup-file start-up.
    #[serde(default = "default_backup_init_delay", with = "duration_ms")]
    pub backup_file_init_next_refresh_delay: Duration,
}

const fn default_true() -> bool {
    true
}

const fn default_backup_init_delay() -> Duration {
    Duration::from_secs(5)
}

impl FileBackedConfig {
    /// Creates a config for the given backup path.
    #[must_use]
    pub fn new(backup_file: impl Into<PathBuf>) -> Self {
        Self {
            backup_file: backup_file.into(),
            initialize_from_backup_file: true,
            backup_file_init_next_refresh_delay: default_backup_init_delay(),
        }
    }

    /// Sets whether start-up reads the backup file first.
    #[must_use]
    pub const fn with_initialize_from_backup_file(mut self, enabled: bool) -> Self {
        self.initialize_from_backup_file = enabled;
        self
    }

    /// Sets the refresh delay used after a backup-file start-up.
    #[must_use]
    pub const fn with_backup_file_init_next_refresh_delay(mut self, delay: Duration) -> Self {
        self.backup_file_init_next_refresh_delay = delay;
        self
    }
}

/// Configuration for the dynamic (per-entity) resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    /// Interval of the background cleanup sweep.
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,

    /// Maximum time an entity may go unaccessed before eviction.
    #[serde(with = "duration_ms")]
    pub max_idle_entity_data: Duration,

    /// Whether idle entities are evicted at all.
    pub remove_idle_entity_data: bool,

    /// Lower bound of an entity's cache lifetime.
    #[serde(with = "duration_ms")]
    pub min_cache_duration: Duration,

    /// Upper bound of an entity's cache lifetime.
    #[serde(with = "duration_ms")]
    pub max_cache_duration: Duration,

    /// Fraction of the cache lifetime after which a refresh is attempted.
    pub refresh_delay_factor: f64,

    /// Whether descriptors past their `validUntil` are withheld from results.
    pub require_valid_metadata: bool,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(30 * 60),
            max_idle_entity_data: Duration::from_secs(8 * 60 * 60),
            remove_idle_entity_data: true,
            min_cache_duration: Duration::from_secs(10 * 60),
            max_cache_duration: Duration::from_secs(8 * 60 * 60),
            refresh_delay_factor: 0.75,
            require_valid_metadata: true,
        }
    }
}

impl DynamicConfig {
    /// Sets the cleanup interval and idle threshold.
    #[must_use]
    pub const fn with_idle_eviction(mut self, cleanup_interval: Duration, max_idle: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self.max_idle_entity_data = max_idle;
        self
    }

    /// Sets whether idle entities are evicted.
    #[must_use]
    pub const fn with_remove_idle_entity_data(mut self, remove: bool) -> Self {
        self.remove_idle_entity_data = remove;
        self
    }

    /// Sets the cache lifetime bounds.
    #[must_use]
    pub const fn with_cache_durations(mut self, min: Duration, max: Duration) -> Self {
        self.min_cache_duration = min;
        self.max_cache_duration = max;
        self
    }

    /// Sets whether expired descriptors are withheld.
    #[must_use]
    pub const fn with_require_valid_metadata(mut self, require: bool) -> Self {
        self.require_valid_metadata = require;
        self
    }

    /// Validates the dynamic resolver settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero cleanup interval, inverted
    /// cache bounds, or a factor outside `(0, 1)`.
    pub fn validate(&self) -> ResolverResult<()> {
        if self.cleanup_interval.is_zero() {
            return Err(ResolverError::config("cleanup interval must be greater than zero"));
        }
        if self.min_cache_duration > self.max_cache_duration {
            return Err(ResolverError::config(format!(
                "minimum cache duration {:?} exceeds maximum cache duration {:?}",
                self.min_cache_duration, self.max_cache_duration
            )));
        }
        validate_factor(self.refresh_delay_factor)
    }
}

fn validate_factor(factor: f64) -> ResolverResult<()> {
    if factor > 0.0 && factor < 1.0 {
        Ok(())
    } else {
        Err(ResolverError::config(format!(
            "refresh delay factor must be between 0 and 1 (exclusive), got {factor}"
        )))
    }
}

/// Serde support for Duration as milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reloading_defaults() {
        let config = ReloadingConfig::default();
        assert_eq!(config.min_refresh_delay, Duration::from_secs(300));
        assert_eq!(config.max_refresh_delay, Duration::from_secs(14_400));
        assert!((config.refresh_delay_factor - 0.75).abs() < f64::EPSILON);
        assert!(config.fail_fast_initialization);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reloading_validation_rejects_bad_policies() {
        let inverted = ReloadingConfig::default()
            .with_refresh_delays(Duration::from_secs(60), Duration::from_secs(30));
        assert!(inverted.validate().is_err());

        let zero = ReloadingConfig::default()
            .with_refresh_delays(Duration::ZERO, Duration::from_secs(30));
        assert!(zero.validate().is_err());

        let factor = ReloadingConfig::default().with_refresh_delay_factor(1.5);
        assert!(factor.validate().is_err());
    }

    #[test]
    fn dynamic_defaults() {
        let config = DynamicConfig::default();
        assert_eq!(config.cleanup_interval, Duration::from_secs(1800));
        assert_eq!(config.max_idle_entity_data, Duration::from_secs(28_800));
        assert!(config.remove_idle_entity_data);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn http_config_builder() {
        let config = HttpSourceConfig::new("https://md.example.org/federation.xml")
            .with_timeout(Duration::from_secs(5))
            .with_credentials("fed", "s3cret");

        assert_eq!(config.accept, DEFAULT_ACCEPT);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn durations_serialize_as_millis() {
        let config = ReloadingConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["min_refresh_delay"], 300_000);

        let parsed: ReloadingConfig =
            serde_json::from_str(r#"{"min_refresh_delay": 1000, "max_refresh_delay": 2000}"#)
                .unwrap();
        assert_eq!(parsed.min_refresh_delay, Duration::from_secs(1));
        assert!(parsed.fail_fast_initialization);
    }
}
