//! Run configuration for the Stepwise agent loop.
//!
//! [`RunConfig`] is the immutable parameter set of one run, built and
//! validated through [`RunConfigBuilder`]. [`AgentSettings`] is its on-disk
//! form (`[agent]` section of a TOML file) with environment variable
//! overrides.

pub mod run;
pub mod settings;

use std::path::PathBuf;

pub use run::{
    DEFAULT_MAX_STEPS, DEFAULT_MAX_TOOL_OUTPUT_SIZE, DEFAULT_TIMEOUT_MS, RunConfig,
    RunConfigBuilder, ToolGraphPolicy,
};
pub use settings::AgentSettings;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for stepwise_core::Error {
    fn from(err: ConfigError) -> Self {
        stepwise_core::Error::Config {
            message: err.to_string(),
        }
    }
}
