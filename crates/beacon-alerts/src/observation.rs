//! Decoding of inbound observation messages.
//!
//! Monitors publish either a result (a metric snapshot) or an error for
//! each monitoring round:
//!
//! ```json
//! {"result": {"data": {...}, "meta_data": {...}}}
//! {"error": {"code": 5004, "message": "...", "data": {...}, "meta_data": {...}}}
//! ```
//!
//! Anything else is rejected with [`AlerterError::UnrecognizedObservation`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AlerterError, Result};

/// Identifies the monitored entity an observation belongs to.
///
/// Accepts both the `system_*` and `repo_*` spellings used by the
/// monitors, and either `time` or `last_monitored` for the timestamp.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMetaData")]
pub struct MetaData {
    /// Display name of the entity.
    pub name: String,
    /// Id of the entity.
    pub id: String,
    /// Id of the entity's parent chain or group.
    pub parent_id: String,
    /// Observation time as unix seconds.
    pub timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct RawMetaData {
    system_name: Option<String>,
    system_id: Option<String>,
    system_parent_id: Option<String>,
    repo_name: Option<String>,
    repo_id: Option<String>,
    repo_parent_id: Option<String>,
    time: Option<f64>,
    last_monitored: Option<f64>,
}

impl TryFrom<RawMetaData> for MetaData {
    type Error = AlerterError;

    fn try_from(raw: RawMetaData) -> Result<Self> {
        fn required(value: Option<String>, field: &str) -> Result<String> {
            value.ok_or_else(|| AlerterError::unrecognized(format!("meta_data is missing '{field}'")))
        }

        Ok(Self {
            name: required(raw.system_name.or(raw.repo_name), "system_name")?,
            id: required(raw.system_id.or(raw.repo_id), "system_id")?,
            parent_id: required(raw.system_parent_id.or(raw.repo_parent_id), "system_parent_id")?,
            timestamp: raw
                .last_monitored
                .or(raw.time)
                .ok_or_else(|| AlerterError::unrecognized("meta_data is missing 'time'"))?,
        })
    }
}

/// A current/previous pair for one metric. Either side may be null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPair {
    /// Latest value.
    #[serde(default)]
    pub current: Option<f64>,
    /// Value from the previous monitoring round.
    #[serde(default)]
    pub previous: Option<f64>,
}

impl MetricPair {
    /// Creates a pair.
    #[must_use]
    pub const fn new(current: Option<f64>, previous: Option<f64>) -> Self {
        Self { current, previous }
    }

    /// Returns `(current, previous)` if both are known and they differ.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn changed(&self) -> Option<(f64, f64)> {
        match (self.current, self.previous) {
            (Some(current), Some(previous)) if current != previous => Some((current, previous)),
            _ => None,
        }
    }
}

/// A successful monitoring round.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultObservation<D> {
    /// Metric payload.
    pub data: D,
    /// Entity identification.
    pub meta_data: MetaData,
}

/// A failed monitoring round.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorObservation {
    /// Numeric error code, see [`ErrorCode`].
    pub code: i64,
    /// Human readable message from the monitor.
    pub message: String,
    /// Code-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Entity identification.
    pub meta_data: MetaData,
}

impl ErrorObservation {
    /// Returns the decoded error code.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::UnrecognizedErrorCode` for unknown codes.
    pub fn error_code(&self) -> Result<ErrorCode> {
        ErrorCode::try_from(self.code)
    }

    /// Decodes the code-specific payload.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::UnrecognizedObservation` if the payload has the wrong shape.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.data).map_err(|err| {
            AlerterError::unrecognized(format!("error {} has malformed data: {err}", self.code))
        })
    }
}

/// An inbound observation: exactly one of a result or an error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation<D> {
    /// A metric snapshot.
    Result(ResultObservation<D>),
    /// A monitoring error.
    Error(ErrorObservation),
}

impl<D: DeserializeOwned> Observation<D> {
    /// Parses an observation from a raw message body.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::UnrecognizedObservation` if the body is not
    /// JSON, has neither or both of `result`/`error`, or misses required fields.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|err| AlerterError::unrecognized(err.to_string()))
    }

    /// Parses an observation from a JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`Observation::from_slice`].
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|err| AlerterError::unrecognized(err.to_string()))
    }
}

impl<D> Observation<D> {
    /// Returns the entity identification of either form.
    #[must_use]
    pub const fn meta_data(&self) -> &MetaData {
        match self {
            Self::Result(result) => &result.meta_data,
            Self::Error(error) => &error.meta_data,
        }
    }
}

/// Error codes the alerters act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The system could not be reached.
    SystemIsDown,
    /// The repository's release page could not be fetched.
    CannotAccessGitHubPage,
    /// The monitor received data it could not interpret.
    ReceivedUnexpectedData,
    /// The monitored URL is invalid.
    InvalidUrl,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::SystemIsDown => 5004,
            Self::CannotAccessGitHubPage => 5006,
            Self::ReceivedUnexpectedData => 5008,
            Self::InvalidUrl => 5009,
        }
    }
}

impl TryFrom<i64> for ErrorCode {
    type Error = AlerterError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            5004 => Ok(Self::SystemIsDown),
            5006 => Ok(Self::CannotAccessGitHubPage),
            5008 => Ok(Self::ReceivedUnexpectedData),
            5009 => Ok(Self::InvalidUrl),
            other => Err(AlerterError::UnrecognizedErrorCode { code: other }),
        }
    }
}

/// Metric payload of a system monitor result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// When the system went down, if it is believed to be down.
    pub went_down_at: MetricPair,
    /// Open file descriptor usage, percent.
    pub open_file_descriptors: MetricPair,
    /// CPU usage, percent.
    pub system_cpu_usage: MetricPair,
    /// RAM usage, percent.
    pub system_ram_usage: MetricPair,
    /// Storage usage, percent.
    pub system_storage_usage: MetricPair,
}

/// Payload of a system-is-down error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownData {
    /// `current` is when the outage started; `previous` is null on first detection.
    pub went_down_at: MetricPair,
}

/// One repository release as reported by the GitHub monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release title.
    #[serde(default)]
    pub release_name: Option<String>,
    /// Git tag of the release.
    #[serde(default)]
    pub tag_name: Option<String>,
}

/// Metric payload of a GitHub monitor result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GithubMetrics {
    /// Number of releases now and in the previous round.
    pub no_of_releases: MetricPair,
    /// Latest releases keyed by index, `"0"` being the newest.
    #[serde(default)]
    pub releases: BTreeMap<String, Release>,
}
