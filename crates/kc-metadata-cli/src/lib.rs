//! # kc-metadata-cli
//!
//! CLI tools for SAML federation metadata.
//!
//! This crate provides command-line utilities for:
//! - Inspecting metadata documents (entities, roles, expiry)
//! - Resolving entities through reloading HTTP and file-backed resolvers
//! - Querying Metadata Query (MDQ) responders through the dynamic resolver
//! - Watching the refresh schedule of a reloading resolver

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use cli::Cli;
pub use config::CliConfig;
pub use error::{CliError, CliResult};
