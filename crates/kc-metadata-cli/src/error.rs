//! CLI error types.

use kc_saml_metadata::{DocumentError, ResolverError};
use thiserror::Error;

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Resolver error.
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// Metadata document error.
    #[error("metadata error: {0}")]
    Document(#[from] DocumentError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP status other than success.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
}

/// CLI result type.
pub type CliResult<T> = Result<T, CliError>;
