//! Error types for the alerter process.

use std::path::PathBuf;

use beacon_alerts::{AlerterError, PipelineError};
use beacon_broker::BrokerError;
use thiserror::Error;

/// Errors loading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("failed to write config file '{}': {source}", path.display())]
    Write {
        /// Path that was written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the expected shape.
    #[error("invalid TOML: {0}")]
    Parse(String),

    /// The configuration could not be rendered as TOML.
    #[error("failed to encode config: {0}")]
    Encode(String),

    /// A value is out of range.
    #[error("configuration error: {0}")]
    Invalid(String),

    /// Alerter settings were rejected.
    #[error(transparent)]
    Alerter(#[from] AlerterError),
}

/// Errors that end a standalone run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The pipeline stopped with an error it cannot recover from.
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    /// Feeding observations or collecting alerts failed at the broker.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Reading observations or writing alerts failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AlerterError> for RunError {
    fn from(err: AlerterError) -> Self {
        Self::Config(ConfigError::Alerter(err))
    }
}
