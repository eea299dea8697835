//! Alert classification and reliable alert publishing for Beacon.
//!
//! `beacon-alerts` turns the observations published by Beacon's monitors
//! into alerts and republishes them for routing.
//!
//! # Features
//!
//! - **Threshold classification**: warning bands fire once per crossing,
//!   critical bands repeat on a cooldown
//! - **Down-time detection**: went down, still down and back up alerts
//! - **Engines**: a system alerter per parent chain and a GitHub release alerter
//! - **Pipeline**: acknowledge-before-publish handling over any [`beacon_broker::Broker`],
//!   with a bounded publish queue that keeps the newest alerts
//!
//! # Example
//!
//! ```rust
//! use beacon_alerts::{AlertCode, ObservationClassifier, Severity, SystemAlerter, SystemAlertsSettings};
//!
//! # fn main() -> Result<(), beacon_alerts::AlerterError> {
//! let mut alerter = SystemAlerter::from_settings(&SystemAlertsSettings::new("chain_1"))?;
//!
//! let body = br#"{"error": {
//!     "code": 5009,
//!     "message": "Invalid URL http:/validator-1:9100",
//!     "meta_data": {
//!         "system_name": "validator-1",
//!         "system_id": "sys_1",
//!         "system_parent_id": "chain_1",
//!         "time": 1700000000.0
//!     }
//! }}"#;
//!
//! let alerts = alerter.process(body, chrono::Utc::now())?;
//! assert_eq!(alerts.len(), 1);
//! assert_eq!(alerts[0].alert_code(), AlertCode::InvalidUrl);
//! assert_eq!(alerts[0].severity(), Severity::Error);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod downtime;
pub mod engine;
pub mod error;
pub mod github;
pub mod limiter;
pub mod observation;
pub mod pipeline;
pub mod queue;
pub mod threshold;
pub mod types;

pub use config::{
    DownDetectionConfig, DownDetectionSettings, GithubAlertsSettings, MetricThresholdConfig,
    SystemAlertsConfig, SystemAlertsSettings, ThresholdSettings,
};
pub use engine::{ObservationClassifier, SystemAlerter, SYSTEM_ALERT_ROUTING_KEY};
pub use error::{AlerterError, PipelineError, Result};
pub use github::{GithubAlerter, GITHUB_ALERT_ROUTING_KEY};
pub use limiter::RateLimiter;
pub use observation::{
    DownData, ErrorCode, ErrorObservation, GithubMetrics, MetaData, MetricPair, Observation,
    Release, ResultObservation, SystemMetrics,
};
pub use pipeline::{AlertPipeline, PipelineConfig, PipelineStats};
pub use queue::{PublishQueue, QueuedAlert};
pub use threshold::ThresholdMetric;
pub use types::{Alert, AlertCode, AlertData, MetricCode, Severity};

pub use tokio_util::sync::CancellationToken;
