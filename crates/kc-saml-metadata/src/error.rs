//! Metadata resolver error types.
//!
//! Resolution never fails for "no data": a miss is an empty result. Errors
//! are reserved for misuse (lifecycle, missing criteria), configuration
//! problems, and failed fetch/parse/filter cycles.

use thiserror::Error;

use crate::document::DocumentError;
use crate::filter::FilterError;

/// Result type for resolver operations.
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Errors that can occur while loading or resolving metadata.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Invalid resolver configuration (backup path, URL, delay policy).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Metadata could not be retrieved from its source.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Metadata bytes are not a well-formed metadata document.
    #[error("parse error: {0}")]
    Parse(#[from] DocumentError),

    /// A metadata filter rejected the document.
    #[error("filter failure: {0}")]
    Filter(#[from] FilterError),

    /// The resolver is not in a state that allows the operation.
    #[error("resolver '{resolver}' is {state}")]
    Lifecycle {
        /// Resolver identifier.
        resolver: String,
        /// Human readable state ("not initialized", "destroyed").
        state: &'static str,
    },

    /// A required criterion was not supplied.
    #[error("missing required criterion: {0}")]
    MissingCriterion(&'static str),

    /// Filesystem error outside the fetch path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolverError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a fetch error.
    #[must_use]
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Creates a "not initialized" lifecycle error.
    #[must_use]
    pub fn not_initialized(resolver: impl Into<String>) -> Self {
        Self::Lifecycle {
            resolver: resolver.into(),
            state: "not initialized",
        }
    }

    /// Creates a "destroyed" lifecycle error.
    #[must_use]
    pub fn destroyed(resolver: impl Into<String>) -> Self {
        Self::Lifecycle {
            resolver: resolver.into(),
            state: "destroyed",
        }
    }

    /// Checks if this is a fetch (network or I/O) error.
    #[must_use]
    pub const fn is_fetch_error(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }

    /// Checks if this error came from bad metadata content.
    #[must_use]
    pub const fn is_content_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Filter(_))
    }

    /// Checks if this error is caused by caller misuse.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(self, Self::Lifecycle { .. } | Self::MissingCriterion(_))
    }
}

impl From<reqwest::Error> for ResolverError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories() {
        assert!(ResolverError::fetch("connection refused").is_fetch_error());
        assert!(ResolverError::not_initialized("md").is_usage_error());
        assert!(ResolverError::MissingCriterion("entityID").is_usage_error());
        assert!(!ResolverError::config("bad path").is_usage_error());

        let err: ResolverError = DocumentError::NotMetadata("html".to_string()).into();
        assert!(err.is_content_error());
    }

    #[test]
    fn lifecycle_error_display() {
        let err = ResolverError::destroyed("incommon");
        assert_eq!(err.to_string(), "resolver 'incommon' is destroyed");
    }
}
