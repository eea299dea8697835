//! Alerter configuration file.
//!
//! One file configures one alerter process:
//!
//! ```toml
//! [pipeline]
//! observation_exchange = "alert"
//! alert_exchange = "alert"
//! max_queue_size = 1000
//!
//! [alerter]
//! kind = "system"
//! parent_id = "chain_1"
//!
//! [alerter.system_cpu_usage]
//! warning_threshold = 70.0
//! critical_threshold = 90.0
//! ```

use std::path::Path;
use std::time::Duration;

use beacon_alerts::{GithubAlertsSettings, PipelineConfig, SystemAlertsSettings};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Broker and publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Exchange observations arrive on.
    pub observation_exchange: String,
    /// Exchange alerts are published to.
    pub alert_exchange: String,
    /// Capacity of the publish queue.
    pub max_queue_size: usize,
    /// Seconds between attempts to delete the input queue on shutdown.
    pub retry_interval_secs: u64,
    /// Seconds to wait before reconnecting after the broker connection drops.
    pub reconnect_delay_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            observation_exchange: pipeline.observation_exchange,
            alert_exchange: pipeline.alert_exchange,
            max_queue_size: pipeline.max_queue_size,
            retry_interval_secs: pipeline.retry_interval.as_secs(),
            reconnect_delay_secs: 5,
        }
    }
}

impl PipelineSettings {
    /// Builds the pipeline configuration.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            observation_exchange: self.observation_exchange.clone(),
            alert_exchange: self.alert_exchange.clone(),
            max_queue_size: self.max_queue_size,
            retry_interval: Duration::from_secs(self.retry_interval_secs),
        }
    }

    /// Delay before reconnecting.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Which alerter a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AlerterKind {
    /// Threshold and down-time alerts for the systems of one parent.
    System,
    /// Release alerts for monitored GitHub repositories.
    Github,
}

/// Settings of the alerter a process runs, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlerterSettings {
    /// A system alerter.
    System(SystemAlertsSettings),
    /// The GitHub alerter.
    Github(GithubAlertsSettings),
}

impl AlerterSettings {
    /// Returns the alerter kind.
    #[must_use]
    pub const fn kind(&self) -> AlerterKind {
        match self {
            Self::System(_) => AlerterKind::System,
            Self::Github(_) => AlerterKind::Github,
        }
    }
}

/// Main alerter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlerterConfig {
    /// Pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// The alerter.
    pub alerter: AlerterSettings,
}

impl AlerterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has no TOML representation.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Encode(e.to_string()))
    }

    /// Write the configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.pipeline_config().validate()?;

        if self.pipeline.retry_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "retry_interval_secs must be at least 1".to_string(),
            ));
        }

        if let AlerterSettings::System(settings) = &self.alerter {
            settings.validate()?;
        }

        Ok(())
    }

    /// A sample configuration with default thresholds.
    #[must_use]
    pub fn sample(kind: AlerterKind) -> Self {
        let alerter = match kind {
            AlerterKind::System => AlerterSettings::System(SystemAlertsSettings::new("chain_1")),
            AlerterKind::Github => AlerterSettings::Github(GithubAlertsSettings::default()),
        };
        Self {
            pipeline: PipelineSettings::default(),
            alerter,
        }
    }
}
