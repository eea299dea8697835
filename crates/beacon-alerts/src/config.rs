//! Per-entity alert configuration.
//!
//! The `*Settings` types are the serializable input supplied from outside.
//! They are turned into runtime configs that own their rate limiters, so
//! each limiter is only ever touched by the classifier evaluating its metric.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AlerterError, Result};
use crate::limiter::RateLimiter;

/// Threshold settings for one metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdSettings {
    /// Whether the metric is evaluated at all.
    pub enabled: bool,
    /// Whether warning alerts are raised.
    pub warning_enabled: bool,
    /// Lower bound of the warning band.
    pub warning_threshold: f64,
    /// Whether critical alerts are raised.
    pub critical_enabled: bool,
    /// Lower bound of the critical band.
    pub critical_threshold: f64,
    /// Minimum seconds between repeated critical alerts.
    pub critical_repeat: u64,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_enabled: true,
            warning_threshold: 85.0,
            critical_enabled: true,
            critical_threshold: 95.0,
            critical_repeat: 300,
        }
    }
}

impl ThresholdSettings {
    fn validate(&self, metric: &str) -> Result<()> {
        if !self.warning_threshold.is_finite() || !self.critical_threshold.is_finite() {
            return Err(AlerterError::InvalidConfig {
                reason: format!("{metric}: thresholds must be finite numbers"),
            });
        }
        if self.warning_enabled
            && self.critical_enabled
            && self.warning_threshold >= self.critical_threshold
        {
            warn!(
                metric,
                warning = self.warning_threshold,
                critical = self.critical_threshold,
                "warning threshold is not below critical threshold"
            );
        }
        Ok(())
    }
}

/// Down-time detection settings for one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownDetectionSettings {
    /// Whether down-time is evaluated at all.
    pub enabled: bool,
    /// Whether warning alerts are raised.
    pub warning_enabled: bool,
    /// Downtime in seconds after which warnings are raised, and the minimum
    /// gap between repeated warnings.
    pub warning_repeat: u64,
    /// Whether critical alerts are raised.
    pub critical_enabled: bool,
    /// Downtime in seconds after which alerts escalate to critical, and the
    /// minimum gap between repeated critical alerts.
    pub critical_repeat: u64,
}

impl Default for DownDetectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_enabled: true,
            warning_repeat: 0,
            critical_enabled: true,
            critical_repeat: 200,
        }
    }
}

/// Settings for a system alerter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemAlertsSettings {
    /// Chain or group whose systems this alerter handles.
    pub parent_id: String,
    /// Open file descriptor thresholds.
    #[serde(default)]
    pub open_file_descriptors: ThresholdSettings,
    /// CPU usage thresholds.
    #[serde(default)]
    pub system_cpu_usage: ThresholdSettings,
    /// RAM usage thresholds.
    #[serde(default)]
    pub system_ram_usage: ThresholdSettings,
    /// Storage usage thresholds.
    #[serde(default)]
    pub system_storage_usage: ThresholdSettings,
    /// Down-time detection.
    #[serde(default)]
    pub system_is_down: DownDetectionSettings,
}

impl SystemAlertsSettings {
    /// Creates settings with default thresholds for a parent.
    #[must_use]
    pub fn new(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            open_file_descriptors: ThresholdSettings::default(),
            system_cpu_usage: ThresholdSettings::default(),
            system_ram_usage: ThresholdSettings::default(),
            system_storage_usage: ThresholdSettings::default(),
            system_is_down: DownDetectionSettings::default(),
        }
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::InvalidConfig` for an empty or dotted parent id
    /// or a non-finite threshold.
    pub fn validate(&self) -> Result<()> {
        if self.parent_id.is_empty() {
            return Err(AlerterError::InvalidConfig {
                reason: "parent_id cannot be empty".to_string(),
            });
        }
        if self.parent_id.contains('.') {
            return Err(AlerterError::InvalidConfig {
                reason: "parent_id cannot contain '.'".to_string(),
            });
        }
        self.open_file_descriptors.validate("open_file_descriptors")?;
        self.system_cpu_usage.validate("system_cpu_usage")?;
        self.system_ram_usage.validate("system_ram_usage")?;
        self.system_storage_usage.validate("system_storage_usage")?;
        Ok(())
    }
}

/// Settings for the GitHub release alerter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubAlertsSettings {
    /// Raise an alert per new release.
    pub new_release_enabled: bool,
    /// Raise an alert when the release page cannot be fetched.
    pub cannot_access_enabled: bool,
}

impl Default for GithubAlertsSettings {
    fn default() -> Self {
        Self {
            new_release_enabled: true,
            cannot_access_enabled: true,
        }
    }
}

/// Runtime threshold configuration for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricThresholdConfig {
    /// Whether the metric is evaluated at all.
    pub enabled: bool,
    /// Whether warning alerts are raised.
    pub warning_enabled: bool,
    /// Lower bound of the warning band.
    pub warning_threshold: f64,
    /// Whether critical alerts are raised.
    pub critical_enabled: bool,
    /// Lower bound of the critical band.
    pub critical_threshold: f64,
    critical_limiter: RateLimiter,
}

impl MetricThresholdConfig {
    /// Returns the limiter gating repeated critical alerts.
    #[must_use]
    pub const fn critical_limiter(&self) -> &RateLimiter {
        &self.critical_limiter
    }

    pub(crate) fn critical_limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.critical_limiter
    }
}

impl From<&ThresholdSettings> for MetricThresholdConfig {
    fn from(settings: &ThresholdSettings) -> Self {
        Self {
            enabled: settings.enabled,
            warning_enabled: settings.warning_enabled,
            warning_threshold: settings.warning_threshold,
            critical_enabled: settings.critical_enabled,
            critical_threshold: settings.critical_threshold,
            critical_limiter: RateLimiter::from_secs(settings.critical_repeat),
        }
    }
}

/// Runtime down-time configuration for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DownDetectionConfig {
    /// Whether down-time is evaluated at all.
    pub enabled: bool,
    /// Whether warning alerts are raised.
    pub warning_enabled: bool,
    /// Downtime in seconds after which still-down warnings are raised.
    pub warning_repeat_seconds: u64,
    /// Whether critical alerts are raised.
    pub critical_enabled: bool,
    /// Downtime in seconds after which alerts escalate to critical.
    pub critical_repeat_seconds: u64,
    warning_limiter: RateLimiter,
    critical_limiter: RateLimiter,
}

impl DownDetectionConfig {
    /// Returns the limiter gating repeated still-down warnings.
    #[must_use]
    pub const fn warning_limiter(&self) -> &RateLimiter {
        &self.warning_limiter
    }

    /// Returns the limiter gating repeated still-down critical alerts.
    #[must_use]
    pub const fn critical_limiter(&self) -> &RateLimiter {
        &self.critical_limiter
    }

    pub(crate) fn warning_limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.warning_limiter
    }

    pub(crate) fn critical_limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.critical_limiter
    }
}

impl From<&DownDetectionSettings> for DownDetectionConfig {
    fn from(settings: &DownDetectionSettings) -> Self {
        Self {
            enabled: settings.enabled,
            warning_enabled: settings.warning_enabled,
            warning_repeat_seconds: settings.warning_repeat,
            critical_enabled: settings.critical_enabled,
            critical_repeat_seconds: settings.critical_repeat,
            warning_limiter: RateLimiter::from_secs(settings.warning_repeat),
            critical_limiter: RateLimiter::from_secs(settings.critical_repeat),
        }
    }
}

/// Runtime configuration of a system alerter.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemAlertsConfig {
    /// Chain or group whose systems this alerter handles.
    pub parent_id: String,
    /// Open file descriptor thresholds.
    pub open_file_descriptors: MetricThresholdConfig,
    /// CPU usage thresholds.
    pub system_cpu_usage: MetricThresholdConfig,
    /// RAM usage thresholds.
    pub system_ram_usage: MetricThresholdConfig,
    /// Storage usage thresholds.
    pub system_storage_usage: MetricThresholdConfig,
    /// Down-time detection.
    pub system_is_down: DownDetectionConfig,
}

impl SystemAlertsConfig {
    /// Validates settings and builds a runtime configuration with fresh limiters.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::InvalidConfig` if the settings do not validate.
    pub fn from_settings(settings: &SystemAlertsSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            parent_id: settings.parent_id.clone(),
            open_file_descriptors: (&settings.open_file_descriptors).into(),
            system_cpu_usage: (&settings.system_cpu_usage).into(),
            system_ram_usage: (&settings.system_ram_usage).into(),
            system_storage_usage: (&settings.system_storage_usage).into(),
            system_is_down: (&settings.system_is_down).into(),
        })
    }
}
