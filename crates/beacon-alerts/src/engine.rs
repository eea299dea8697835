//! Classification engines.
//!
//! An [`ObservationClassifier`] turns one decoded observation into zero or
//! more alerts and describes the broker topology it consumes from. The
//! pipeline is generic over this trait.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{SystemAlertsConfig, SystemAlertsSettings};
use crate::downtime;
use crate::error::{AlerterError, Result};
use crate::observation::{
    DownData, ErrorCode, ErrorObservation, Observation, ResultObservation, SystemMetrics,
};
use crate::threshold::{self, ThresholdMetric};
use crate::types::{Alert, AlertCode, MetricCode, Severity};

/// Routing key under which system alerts are published.
pub const SYSTEM_ALERT_ROUTING_KEY: &str = "alert_router.system";

/// Turns observations into alerts.
pub trait ObservationClassifier {
    /// Payload type of result observations.
    type Data: DeserializeOwned;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Name of the durable queue this classifier consumes.
    fn input_queue(&self) -> String;

    /// Routing key binding the input queue to the observation exchange.
    fn input_routing_key(&self) -> String;

    /// Routing key alerts are published with.
    fn output_routing_key(&self) -> &str;

    /// Returns true if a message delivered with `routing_key` is meant for
    /// this classifier.
    fn accepts(&self, _routing_key: &str) -> bool {
        true
    }

    /// Classifies one observation observed at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::UnrecognizedObservation` or
    /// `AlerterError::UnrecognizedErrorCode` for inputs it cannot handle.
    fn classify(&mut self, observation: Observation<Self::Data>, now: DateTime<Utc>) -> Result<Vec<Alert>>;

    /// Decodes a raw message body and classifies it.
    ///
    /// # Errors
    ///
    /// Same as [`ObservationClassifier::classify`], plus decoding failures.
    fn process(&mut self, body: &[u8], now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let observation = Observation::<Self::Data>::from_slice(body)?;
        let alerts = self.classify(observation, now)?;
        for alert in &alerts {
            debug!(
                alerter = self.name(),
                alert = %alert.alert_code(),
                severity = %alert.severity(),
                origin_id = alert.origin_id(),
                "classified alert"
            );
        }
        Ok(alerts)
    }
}

/// Raises alerts about the systems of one parent chain or group.
#[derive(Debug, Clone)]
pub struct SystemAlerter {
    name: String,
    config: SystemAlertsConfig,
}

impl SystemAlerter {
    /// Creates an alerter owning `config`.
    #[must_use]
    pub fn new(config: SystemAlertsConfig) -> Self {
        Self {
            name: format!("System Alerter ({})", config.parent_id),
            config,
        }
    }

    /// Creates an alerter from external settings.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::InvalidConfig` if the settings do not validate.
    pub fn from_settings(settings: &SystemAlertsSettings) -> Result<Self> {
        Ok(Self::new(SystemAlertsConfig::from_settings(settings)?))
    }

    /// Returns the runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &SystemAlertsConfig {
        &self.config
    }

    fn classify_result(
        &mut self,
        result: &ResultObservation<SystemMetrics>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let meta = &result.meta_data;
        let data = &result.data;
        let mut alerts =
            downtime::classify_back_up(&data.went_down_at, &self.config.system_is_down, meta);

        let metrics = [
            (
                ThresholdMetric::OpenFileDescriptors,
                &data.open_file_descriptors,
                &mut self.config.open_file_descriptors,
            ),
            (
                ThresholdMetric::CpuUsage,
                &data.system_cpu_usage,
                &mut self.config.system_cpu_usage,
            ),
            (
                ThresholdMetric::RamUsage,
                &data.system_ram_usage,
                &mut self.config.system_ram_usage,
            ),
            (
                ThresholdMetric::StorageUsage,
                &data.system_storage_usage,
                &mut self.config.system_storage_usage,
            ),
        ];
        for (metric, pair, config) in metrics {
            if !config.enabled {
                continue;
            }
            if let Some((current, previous)) = pair.changed() {
                alerts.extend(threshold::classify(
                    metric,
                    current,
                    Some(previous),
                    config,
                    meta,
                    now,
                ));
            }
        }
        alerts
    }

    fn classify_error(&mut self, error: &ErrorObservation, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let meta = &error.meta_data;
        match error.error_code()? {
            ErrorCode::ReceivedUnexpectedData => Ok(vec![Alert::new(
                AlertCode::ReceivedUnexpectedData,
                MetricCode::UnexpectedData,
                error.message.clone(),
                Severity::Error,
                meta.timestamp,
                &meta.parent_id,
                &meta.id,
                None,
            )]),
            ErrorCode::InvalidUrl => Ok(vec![Alert::new(
                AlertCode::InvalidUrl,
                MetricCode::InvalidUrl,
                error.message.clone(),
                Severity::Error,
                meta.timestamp,
                &meta.parent_id,
                &meta.id,
                None,
            )]),
            ErrorCode::SystemIsDown => {
                let down: DownData = error.data_as()?;
                downtime::classify_down(&down, &mut self.config.system_is_down, meta, now)
            }
            ErrorCode::CannotAccessGitHubPage => {
                Err(AlerterError::UnrecognizedErrorCode { code: error.code })
            }
        }
    }
}

impl ObservationClassifier for SystemAlerter {
    type Data = SystemMetrics;

    fn name(&self) -> &str {
        &self.name
    }

    fn input_queue(&self) -> String {
        format!("system_alerter_queue_{}", self.config.parent_id)
    }

    fn input_routing_key(&self) -> String {
        format!("alerter.system.{}", self.config.parent_id)
    }

    fn output_routing_key(&self) -> &str {
        SYSTEM_ALERT_ROUTING_KEY
    }

    fn accepts(&self, routing_key: &str) -> bool {
        routing_key.split('.').any(|word| word == self.config.parent_id)
    }

    fn classify(&mut self, observation: Observation<SystemMetrics>, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        match observation {
            Observation::Result(result) => Ok(self.classify_result(&result, now)),
            Observation::Error(error) => self.classify_error(&error, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn alerter() -> SystemAlerter {
        let mut settings = SystemAlertsSettings::new("chain_1");
        for metric in [
            &mut settings.open_file_descriptors,
            &mut settings.system_cpu_usage,
            &mut settings.system_ram_usage,
            &mut settings.system_storage_usage,
        ] {
            metric.warning_threshold = 70.0;
            metric.critical_threshold = 90.0;
        }
        SystemAlerter::from_settings(&settings).expect("valid settings")
    }

    fn meta() -> Value {
        json!({
            "system_name": "validator-1",
            "system_id": "sys_1",
            "system_parent_id": "chain_1",
            "last_monitored": 5_000.0,
            "time": 5_000.0
        })
    }

    fn pair(current: Option<f64>, previous: Option<f64>) -> Value {
        json!({"current": current, "previous": previous})
    }

    fn result_body(cpu: Value, ram: Value, went_down_at: Value) -> Vec<u8> {
        json!({"result": {
            "data": {
                "went_down_at": went_down_at,
                "open_file_descriptors": pair(Some(10.0), Some(10.0)),
                "system_cpu_usage": cpu,
                "system_ram_usage": ram,
                "system_storage_usage": pair(Some(20.0), Some(21.0))
            },
            "meta_data": meta()
        }})
        .to_string()
        .into_bytes()
    }

    fn error_body(code: i64, data: Value) -> Vec<u8> {
        json!({"error": {
            "code": code,
            "message": "monitor says so",
            "data": data,
            "meta_data": meta()
        }})
        .to_string()
        .into_bytes()
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(5_000, 0).expect("valid timestamp")
    }

    mod topology_tests {
        use super::*;

        #[test]
        fn names_follow_parent() {
            let alerter = alerter();
            assert_eq!(alerter.input_queue(), "system_alerter_queue_chain_1");
            assert_eq!(alerter.input_routing_key(), "alerter.system.chain_1");
            assert_eq!(alerter.output_routing_key(), "alert_router.system");
            assert_eq!(alerter.name(), "System Alerter (chain_1)");
        }

        #[test]
        fn accepts_only_own_parent() {
            let alerter = alerter();
            assert!(alerter.accepts("alerter.system.chain_1"));
            assert!(!alerter.accepts("alerter.system.chain_10"));
            assert!(!alerter.accepts("alerter.system.other"));
        }
    }

    mod result_tests {
        use super::*;

        #[test]
        fn metrics_are_evaluated_in_order() {
            let mut alerter = alerter();
            let body = result_body(
                pair(Some(75.0), Some(60.0)),
                pair(Some(95.0), Some(50.0)),
                pair(None, Some(4_000.0)),
            );
            let alerts = alerter.process(&body, now()).expect("classify");
            let codes: Vec<_> = alerts.iter().map(Alert::alert_code).collect();
            assert_eq!(
                codes,
                vec![
                    AlertCode::SystemBackUpAgain,
                    AlertCode::SystemCpuUsageIncreasedAboveThreshold,
                    AlertCode::SystemRamUsageIncreasedAboveThreshold,
                ]
            );
            assert_eq!(alerts[2].severity(), Severity::Critical);
        }

        #[test]
        fn ram_uses_its_own_thresholds() {
            let mut settings = SystemAlertsSettings::new("chain_1");
            settings.system_cpu_usage.warning_threshold = 10.0;
            settings.system_cpu_usage.critical_threshold = 20.0;
            settings.system_ram_usage.warning_threshold = 70.0;
            settings.system_ram_usage.critical_threshold = 90.0;
            let mut alerter = SystemAlerter::from_settings(&settings).expect("valid");

            let body = result_body(
                pair(Some(5.0), Some(5.0)),
                pair(Some(50.0), Some(40.0)),
                pair(None, None),
            );
            assert!(alerter.process(&body, now()).expect("classify").is_empty());
        }

        #[test]
        fn unchanged_or_unknown_values_are_skipped() {
            let mut alerter = alerter();
            let body = result_body(
                pair(Some(95.0), Some(95.0)),
                pair(Some(95.0), None),
                pair(None, None),
            );
            assert!(alerter.process(&body, now()).expect("classify").is_empty());
        }

        #[test]
        fn disabled_metric_is_skipped() {
            let mut settings = SystemAlertsSettings::new("chain_1");
            settings.system_cpu_usage.enabled = false;
            let mut alerter = SystemAlerter::from_settings(&settings).expect("valid");
            let body = result_body(
                pair(Some(99.0), Some(10.0)),
                pair(Some(10.0), Some(10.0)),
                pair(None, None),
            );
            assert!(alerter.process(&body, now()).expect("classify").is_empty());
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn unexpected_data_and_invalid_url() {
            let mut alerter = alerter();
            let alerts = alerter.process(&error_body(5008, json!({})), now()).expect("classify");
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].alert_code(), AlertCode::ReceivedUnexpectedData);
            assert_eq!(alerts[0].severity(), Severity::Error);
            assert_eq!(alerts[0].message(), "monitor says so");

            let alerts = alerter.process(&error_body(5009, json!({})), now()).expect("classify");
            assert_eq!(alerts[0].alert_code(), AlertCode::InvalidUrl);
            assert_eq!(alerts[0].metric(), MetricCode::InvalidUrl);
        }

        #[test]
        fn system_down() {
            let mut alerter = alerter();
            let body = error_body(
                5004,
                json!({"went_down_at": {"current": 4_880.0, "previous": null}}),
            );
            let alerts = alerter.process(&body, now()).expect("classify");
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].alert_code(), AlertCode::SystemWentDownAt);
            assert_eq!(alerts[0].severity(), Severity::Warning);
        }

        #[test]
        fn unknown_codes_are_rejected() {
            let mut alerter = alerter();
            for code in [5006, 1234] {
                assert_eq!(
                    alerter.process(&error_body(code, json!({})), now()),
                    Err(AlerterError::UnrecognizedErrorCode { code })
                );
            }
        }

        #[test]
        fn malformed_body_is_rejected() {
            let mut alerter = alerter();
            assert!(matches!(
                alerter.process(b"{\"something\": 1}", now()),
                Err(AlerterError::UnrecognizedObservation { .. })
            ));
        }
    }
}
