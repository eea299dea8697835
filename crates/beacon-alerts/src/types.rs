//! Core types for alert records.
//!
//! - [`Severity`]: how urgent an alert is
//! - [`AlertCode`]: the enumerated kind of an alert
//! - [`MetricCode`]: the grouping code used by downstream routing
//! - [`AlertData`]: optional structured payload
//! - [`Alert`]: the immutable record published for routing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlerterError, Result};

/// The severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Requires immediate attention.
    Critical,
    /// Should be investigated.
    Warning,
    /// Informational, usually a recovery.
    Info,
    /// The monitored source itself misbehaved.
    Error,
}

impl Severity {
    /// Returns the severity as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of an alert.
///
/// Serialized as `{"name": ..., "code": ...}`; both strings are stable and
/// used by alert routers to deduplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AlertCodeRepr", into = "AlertCodeRepr")]
pub enum AlertCode {
    /// Open file descriptors entered the warning or critical band.
    OpenFileDescriptorsIncreasedAboveThreshold,
    /// CPU usage entered the warning or critical band.
    SystemCpuUsageIncreasedAboveThreshold,
    /// Storage usage entered the warning or critical band.
    SystemStorageUsageIncreasedAboveThreshold,
    /// RAM usage entered the warning or critical band.
    SystemRamUsageIncreasedAboveThreshold,
    /// The monitored source URL is invalid.
    InvalidUrl,
    /// Open file descriptors left a band downwards.
    OpenFileDescriptorsDecreasedBelowThreshold,
    /// CPU usage left a band downwards.
    SystemCpuUsageDecreasedBelowThreshold,
    /// RAM usage left a band downwards.
    SystemRamUsageDecreasedBelowThreshold,
    /// Storage usage left a band downwards.
    SystemStorageUsageDecreasedBelowThreshold,
    /// The monitor received data it could not interpret.
    ReceivedUnexpectedData,
    /// The system became unreachable.
    SystemWentDownAt,
    /// The system is reachable again.
    SystemBackUpAgain,
    /// The system is still unreachable.
    SystemStillDown,
    /// A repository published a new release.
    NewGitHubRepositoryRelease,
    /// The repository's release page could not be fetched.
    CannotAccessGitHubPage,
}

impl AlertCode {
    const ALL: [Self; 15] = [
        Self::OpenFileDescriptorsIncreasedAboveThreshold,
        Self::SystemCpuUsageIncreasedAboveThreshold,
        Self::SystemStorageUsageIncreasedAboveThreshold,
        Self::SystemRamUsageIncreasedAboveThreshold,
        Self::InvalidUrl,
        Self::OpenFileDescriptorsDecreasedBelowThreshold,
        Self::SystemCpuUsageDecreasedBelowThreshold,
        Self::SystemRamUsageDecreasedBelowThreshold,
        Self::SystemStorageUsageDecreasedBelowThreshold,
        Self::ReceivedUnexpectedData,
        Self::SystemWentDownAt,
        Self::SystemBackUpAgain,
        Self::SystemStillDown,
        Self::NewGitHubRepositoryRelease,
        Self::CannotAccessGitHubPage,
    ];

    /// Returns the alert class name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenFileDescriptorsIncreasedAboveThreshold => {
                "OpenFileDescriptorsIncreasedAboveThresholdAlert"
            }
            Self::SystemCpuUsageIncreasedAboveThreshold => "SystemCPUUsageIncreasedAboveThresholdAlert",
            Self::SystemStorageUsageIncreasedAboveThreshold => {
                "SystemStorageUsageIncreasedAboveThresholdAlert"
            }
            Self::SystemRamUsageIncreasedAboveThreshold => "SystemRAMUsageIncreasedAboveThresholdAlert",
            Self::InvalidUrl => "InvalidUrlAlert",
            Self::OpenFileDescriptorsDecreasedBelowThreshold => {
                "OpenFileDescriptorsDecreasedBelowThresholdAlert"
            }
            Self::SystemCpuUsageDecreasedBelowThreshold => "SystemCPUUsageDecreasedBelowThresholdAlert",
            Self::SystemRamUsageDecreasedBelowThreshold => "SystemRAMUsageDecreasedBelowThresholdAlert",
            Self::SystemStorageUsageDecreasedBelowThreshold => {
                "SystemStorageUsageDecreasedBelowThresholdAlert"
            }
            Self::ReceivedUnexpectedData => "ReceivedUnexpectedDataAlert",
            Self::SystemWentDownAt => "SystemWentDownAtAlert",
            Self::SystemBackUpAgain => "SystemBackUpAgainAlert",
            Self::SystemStillDown => "SystemStillDownAlert",
            Self::NewGitHubRepositoryRelease => "NewGitHubRepositoryReleaseAlert",
            Self::CannotAccessGitHubPage => "CannotAccessGitHubPageAlert",
        }
    }

    /// Returns the stable alert code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OpenFileDescriptorsIncreasedAboveThreshold => "system_alert_1",
            Self::SystemCpuUsageIncreasedAboveThreshold => "system_alert_2",
            Self::SystemStorageUsageIncreasedAboveThreshold => "system_alert_3",
            Self::SystemRamUsageIncreasedAboveThreshold => "system_alert_4",
            Self::InvalidUrl => "system_alert_5",
            Self::OpenFileDescriptorsDecreasedBelowThreshold => "system_alert_6",
            Self::SystemCpuUsageDecreasedBelowThreshold => "system_alert_7",
            Self::SystemRamUsageDecreasedBelowThreshold => "system_alert_8",
            Self::SystemStorageUsageDecreasedBelowThreshold => "system_alert_9",
            Self::ReceivedUnexpectedData => "system_alert_10",
            Self::SystemWentDownAt => "system_alert_11",
            Self::SystemBackUpAgain => "system_alert_12",
            Self::SystemStillDown => "system_alert_13",
            Self::NewGitHubRepositoryRelease => "github_alert_1",
            Self::CannotAccessGitHubPage => "github_alert_2",
        }
    }
}

impl std::fmt::Display for AlertCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlertCodeRepr {
    name: String,
    code: String,
}

impl From<AlertCode> for AlertCodeRepr {
    fn from(code: AlertCode) -> Self {
        Self {
            name: code.name().to_string(),
            code: code.code().to_string(),
        }
    }
}

impl TryFrom<AlertCodeRepr> for AlertCode {
    type Error = AlerterError;

    fn try_from(repr: AlertCodeRepr) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == repr.name && c.code() == repr.code)
            .ok_or_else(|| {
                AlerterError::Serialization(format!(
                    "unknown alert code '{}' ({})",
                    repr.name, repr.code
                ))
            })
    }
}

/// Grouping code used downstream to deduplicate and route related alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricCode {
    /// Open file descriptor usage.
    #[serde(rename = "system_open_file_descriptors")]
    OpenFileDescriptors,
    /// CPU usage.
    #[serde(rename = "system_cpu_usage")]
    SystemCpuUsage,
    /// Storage usage.
    #[serde(rename = "system_storage_usage")]
    SystemStorageUsage,
    /// RAM usage.
    #[serde(rename = "system_ram_usage")]
    SystemRamUsage,
    /// Reachability of the system.
    #[serde(rename = "system_is_down")]
    SystemIsDown,
    /// Validity of the monitored URL.
    #[serde(rename = "system_invalid_url")]
    InvalidUrl,
    /// Data the monitor could not interpret.
    #[serde(rename = "system_unexpected_data")]
    UnexpectedData,
    /// Repository releases.
    #[serde(rename = "github_release")]
    GithubRelease,
    /// Reachability of the repository page.
    #[serde(rename = "github_cannot_access")]
    GithubCannotAccess,
}

impl MetricCode {
    /// Returns the code as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenFileDescriptors => "system_open_file_descriptors",
            Self::SystemCpuUsage => "system_cpu_usage",
            Self::SystemStorageUsage => "system_storage_usage",
            Self::SystemRamUsage => "system_ram_usage",
            Self::SystemIsDown => "system_is_down",
            Self::InvalidUrl => "system_invalid_url",
            Self::UnexpectedData => "system_unexpected_data",
            Self::GithubRelease => "github_release",
            Self::GithubCannotAccess => "github_cannot_access",
        }
    }
}

impl std::fmt::Display for MetricCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload attached to threshold and down-time alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    /// Previous metric value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<f64>,
    /// Current metric value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// The threshold band the alert refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_severity: Option<Severity>,
    /// Seconds the entity has been unreachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_for_secs: Option<f64>,
}

/// An alert raised by a classifier.
///
/// Alerts are never mutated after construction. The serialized form is the
/// flat map published to the alert router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    alert_code: AlertCode,
    metric: MetricCode,
    message: String,
    severity: Severity,
    parent_id: String,
    origin_id: String,
    timestamp: f64,
    alert_data: Option<AlertData>,
}

impl Alert {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        alert_code: AlertCode,
        metric: MetricCode,
        message: String,
        severity: Severity,
        timestamp: f64,
        parent_id: &str,
        origin_id: &str,
        alert_data: Option<AlertData>,
    ) -> Self {
        Self {
            alert_code,
            metric,
            message,
            severity,
            parent_id: parent_id.to_string(),
            origin_id: origin_id.to_string(),
            timestamp,
            alert_data,
        }
    }

    /// Returns the alert kind.
    #[must_use]
    pub const fn alert_code(&self) -> AlertCode {
        self.alert_code
    }

    /// Returns the grouping metric code.
    #[must_use]
    pub const fn metric(&self) -> MetricCode {
        self.metric
    }

    /// Returns the human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns the id of the entity's parent (chain or group).
    #[must_use]
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// Returns the id of the entity the alert is about.
    #[must_use]
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Returns the observation time as unix seconds.
    #[must_use]
    pub const fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Returns the structured payload, if any.
    #[must_use]
    pub const fn alert_data(&self) -> Option<&AlertData> {
        self.alert_data.as_ref()
    }

    /// Converts the alert into its flat map form.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::Serialization` if the alert holds a non-finite number.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses an alert from its flat map form.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::Serialization` if fields are missing or unknown codes are used.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Renders a unix timestamp for alert messages.
pub(crate) fn format_timestamp(timestamp: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let millis = (timestamp * 1000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_millis(millis).map_or_else(
        || format!("{timestamp}"),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Renders an elapsed number of seconds as `1h 2m 3s`.
pub(crate) fn format_elapsed(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, rest) = (total / 3600, total % 3600);
    let (minutes, secs) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
