//! The Beacon alerter process.
//!
//! Loads an alerter configuration file and runs one alerter with the
//! reliable publishing pipeline from `beacon-alerts`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod runner;

pub use config::{AlerterConfig, AlerterKind, AlerterSettings, PipelineSettings};
pub use error::{ConfigError, RunError};
pub use runner::{run, run_with_reconnect, RunSummary, Standalone};
