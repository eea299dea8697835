//! Repository release alerts.

use chrono::{DateTime, Utc};

use crate::config::GithubAlertsSettings;
use crate::engine::ObservationClassifier;
use crate::error::{AlerterError, Result};
use crate::observation::{ErrorCode, GithubMetrics, MetaData, Observation};
use crate::types::{Alert, AlertCode, MetricCode, Severity};

/// Routing key under which GitHub alerts are published.
pub const GITHUB_ALERT_ROUTING_KEY: &str = "alert_router.github";

/// Raises alerts about monitored GitHub repositories.
#[derive(Debug, Clone)]
pub struct GithubAlerter {
    settings: GithubAlertsSettings,
}

impl GithubAlerter {
    /// Creates an alerter.
    #[must_use]
    pub const fn new(settings: GithubAlertsSettings) -> Self {
        Self { settings }
    }

    /// One alert per release added since the previous round.
    ///
    /// Every new release must be present in `releases` under its index, so
    /// the number of alerts never exceeds the number of entries received.
    fn release_alerts(data: &GithubMetrics, meta: &MetaData) -> Result<Vec<Alert>> {
        let Some((current, previous)) = data.no_of_releases.changed() else {
            return Ok(Vec::new());
        };
        if !current.is_finite() || !previous.is_finite() || current < 0.0 || previous < 0.0 {
            return Err(AlerterError::unrecognized(format!(
                "invalid release count: current {current}, previous {previous}"
            )));
        }
        if current <= previous {
            return Ok(Vec::new());
        }

        let added = (current - previous).round();
        #[allow(clippy::cast_precision_loss)]
        let available = data.releases.len() as f64;
        if added > available {
            return Err(AlerterError::unrecognized(format!(
                "{added} new releases reported but only {available} listed"
            )));
        }

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let new_releases = added as usize;
        (0..new_releases)
            .map(|index| {
                let release = data.releases.get(&index.to_string()).ok_or_else(|| {
                    AlerterError::unrecognized(format!("release {index} is missing"))
                })?;
                let name = release.release_name.as_deref();
                let tag = release.tag_name.as_deref();
                let message = match (name, tag) {
                    (Some(name), Some(tag)) => {
                        format!("{} has a new release {name} tagged {tag}.", meta.name)
                    }
                    (Some(name), None) => format!("{} has a new release {name}.", meta.name),
                    (None, Some(tag)) => format!("{} has a new release tagged {tag}.", meta.name),
                    (None, None) => format!("{} has a new release.", meta.name),
                };
                Ok(Alert::new(
                    AlertCode::NewGitHubRepositoryRelease,
                    MetricCode::GithubRelease,
                    message,
                    Severity::Info,
                    meta.timestamp,
                    &meta.parent_id,
                    &meta.id,
                    None,
                ))
            })
            .collect()
    }
}

impl Default for GithubAlerter {
    fn default() -> Self {
        Self::new(GithubAlertsSettings::default())
    }
}

impl ObservationClassifier for GithubAlerter {
    type Data = GithubMetrics;

    fn name(&self) -> &str {
        "GitHub Alerter"
    }

    fn input_queue(&self) -> String {
        "github_alerter_queue".to_string()
    }

    fn input_routing_key(&self) -> String {
        "alerter.github".to_string()
    }

    fn output_routing_key(&self) -> &str {
        GITHUB_ALERT_ROUTING_KEY
    }

    fn classify(&mut self, observation: Observation<GithubMetrics>, _now: DateTime<Utc>) -> Result<Vec<Alert>> {
        match observation {
            Observation::Result(result) => {
                if !self.settings.new_release_enabled {
                    return Ok(Vec::new());
                }
                Self::release_alerts(&result.data, &result.meta_data)
            }
            Observation::Error(error) => {
                let meta = &error.meta_data;
                let (code, metric) = match error.error_code()? {
                    ErrorCode::CannotAccessGitHubPage => {
                        if !self.settings.cannot_access_enabled {
                            return Ok(Vec::new());
                        }
                        (AlertCode::CannotAccessGitHubPage, MetricCode::GithubCannotAccess)
                    }
                    ErrorCode::ReceivedUnexpectedData => {
                        (AlertCode::ReceivedUnexpectedData, MetricCode::UnexpectedData)
                    }
                    ErrorCode::SystemIsDown | ErrorCode::InvalidUrl => {
                        return Err(AlerterError::UnrecognizedErrorCode { code: error.code });
                    }
                };
                Ok(vec![Alert::new(
                    code,
                    metric,
                    error.message.clone(),
                    Severity::Error,
                    meta.timestamp,
                    &meta.parent_id,
                    &meta.id,
                    None,
                )])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::MetricPair;
    use serde_json::{json, Value};

    fn meta() -> Value {
        json!({
            "repo_name": "org/node",
            "repo_id": "repo_1",
            "repo_parent_id": "GLOBAL",
            "last_monitored": 100.0
        })
    }

    fn result_body(current: f64, previous: Option<f64>, releases: Value) -> Vec<u8> {
        json!({"result": {
            "data": {
                "no_of_releases": {"current": current, "previous": previous},
                "releases": releases
            },
            "meta_data": meta()
        }})
        .to_string()
        .into_bytes()
    }

    fn error_body(code: i64) -> Vec<u8> {
        json!({"error": {
            "code": code,
            "message": "cannot access https://api.github.com/repos/org/node/releases",
            "meta_data": meta()
        }})
        .to_string()
        .into_bytes()
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(100, 0).expect("valid timestamp")
    }

    #[test]
    fn topology() {
        let alerter = GithubAlerter::default();
        assert_eq!(alerter.input_queue(), "github_alerter_queue");
        assert_eq!(alerter.input_routing_key(), "alerter.github");
        assert_eq!(alerter.output_routing_key(), "alert_router.github");
        assert!(alerter.accepts("alerter.github"));
    }

    #[test]
    fn one_alert_per_new_release() {
        let mut alerter = GithubAlerter::default();
        let body = result_body(
            5.0,
            Some(3.0),
            json!({
                "0": {"release_name": "Hydrogen", "tag_name": "v5.0.0"},
                "1": {"tag_name": "v4.0.0"}
            }),
        );
        let alerts = alerter.process(&body, now()).expect("classify");
        assert_eq!(alerts.len(), 2);
        assert_eq!(
            alerts[0].message(),
            "org/node has a new release Hydrogen tagged v5.0.0."
        );
        assert_eq!(alerts[1].message(), "org/node has a new release tagged v4.0.0.");
        assert!(alerts.iter().all(|a| a.severity() == Severity::Info));
        assert!(alerts.iter().all(|a| a.metric() == MetricCode::GithubRelease));
        assert_eq!(alerts[0].parent_id(), "GLOBAL");
    }

    #[test]
    fn first_observation_and_removals_are_silent() {
        let mut alerter = GithubAlerter::default();
        assert!(alerter.process(&result_body(5.0, None, json!({})), now()).expect("classify").is_empty());
        assert!(alerter.process(&result_body(2.0, Some(3.0), json!({})), now()).expect("classify").is_empty());
    }

    #[test]
    fn missing_release_details_fall_back() {
        let mut alerter = GithubAlerter::default();
        let alerts = alerter
            .process(&result_body(1.0, Some(0.0), json!({"0": {}})), now())
            .expect("classify");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message(), "org/node has a new release.");
    }

    #[test]
    fn unlisted_release_is_unrecognized() {
        let mut alerter = GithubAlerter::default();
        let err = alerter
            .process(&result_body(1.0, Some(0.0), json!({})), now())
            .expect_err("no entry for release 0");
        assert!(matches!(err, AlerterError::UnrecognizedObservation { .. }));

        let err = alerter
            .process(&result_body(2.0, Some(0.0), json!({"1": {"tag_name": "v2"}, "7": {}})), now())
            .expect_err("no entry for release 0");
        assert!(matches!(err, AlerterError::UnrecognizedObservation { .. }));
    }

    #[test]
    fn release_count_beyond_listed_entries_is_rejected() {
        let mut alerter = GithubAlerter::default();
        let body = result_body(1e15, Some(0.0), json!({"0": {"tag_name": "v1"}}));
        let err = alerter.process(&body, now()).expect_err("count exceeds entries");
        assert!(matches!(err, AlerterError::UnrecognizedObservation { .. }));
    }

    #[test]
    fn non_finite_or_negative_counts_are_rejected() {
        let meta: MetaData = serde_json::from_value(meta()).expect("meta");
        for (current, previous) in [
            (f64::INFINITY, 0.0),
            (f64::NAN, 0.0),
            (3.0, f64::NEG_INFINITY),
            (2.0, -1.0),
        ] {
            let data = GithubMetrics {
                no_of_releases: MetricPair::new(Some(current), Some(previous)),
                ..GithubMetrics::default()
            };
            let err = GithubAlerter::release_alerts(&data, &meta).expect_err("invalid count");
            assert!(
                matches!(err, AlerterError::UnrecognizedObservation { .. }),
                "{current} / {previous}"
            );
        }
    }

    #[test]
    fn cannot_access_page() {
        let mut alerter = GithubAlerter::default();
        let alerts = alerter.process(&error_body(5006), now()).expect("classify");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_code(), AlertCode::CannotAccessGitHubPage);
        assert_eq!(alerts[0].severity(), Severity::Error);

        let mut quiet = GithubAlerter::new(GithubAlertsSettings {
            new_release_enabled: true,
            cannot_access_enabled: false,
        });
        assert!(quiet.process(&error_body(5006), now()).expect("classify").is_empty());
    }

    #[test]
    fn unexpected_data() {
        let mut alerter = GithubAlerter::default();
        let alerts = alerter.process(&error_body(5008), now()).expect("classify");
        assert_eq!(alerts[0].alert_code(), AlertCode::ReceivedUnexpectedData);
    }

    #[test]
    fn system_codes_are_unrecognized() {
        let mut alerter = GithubAlerter::default();
        assert_eq!(
            alerter.process(&error_body(5004), now()),
            Err(AlerterError::UnrecognizedErrorCode { code: 5004 })
        );
    }
}
