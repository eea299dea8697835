//! Down-time state machine.
//!
//! The classifier keeps no state of its own between observations. Whether an
//! entity is already known to be down comes from `went_down_at.previous`,
//! which the monitors fill in and clear.

use chrono::{DateTime, Utc};

use crate::config::DownDetectionConfig;
use crate::error::{AlerterError, Result};
use crate::observation::{DownData, MetricPair, MetaData};
use crate::types::{format_elapsed, format_timestamp, Alert, AlertCode, AlertData, MetricCode, Severity};

fn went_down(meta: &MetaData, severity: Severity, down_for: f64) -> Alert {
    Alert::new(
        AlertCode::SystemWentDownAt,
        MetricCode::SystemIsDown,
        format!(
            "{} is down, last time checked: {}.",
            meta.name,
            format_timestamp(meta.timestamp)
        ),
        severity,
        meta.timestamp,
        &meta.parent_id,
        &meta.id,
        Some(AlertData {
            down_for_secs: Some(down_for),
            ..AlertData::default()
        }),
    )
}

fn still_down(meta: &MetaData, severity: Severity, down_for: f64) -> Alert {
    Alert::new(
        AlertCode::SystemStillDown,
        MetricCode::SystemIsDown,
        format!(
            "{} is still down, it has been down for {}.",
            meta.name,
            format_elapsed(down_for)
        ),
        severity,
        meta.timestamp,
        &meta.parent_id,
        &meta.id,
        Some(AlertData {
            down_for_secs: Some(down_for),
            ..AlertData::default()
        }),
    )
}

/// Classifies a system-is-down error.
///
/// # Errors
///
/// Returns `AlerterError::UnrecognizedObservation` if detection is enabled
/// and the payload has no `went_down_at.current`.
pub fn classify_down(
    down: &DownData,
    config: &mut DownDetectionConfig,
    meta: &MetaData,
    now: DateTime<Utc>,
) -> Result<Vec<Alert>> {
    if !config.enabled {
        return Ok(Vec::new());
    }

    let went_down_at = down
        .went_down_at
        .current
        .ok_or_else(|| AlerterError::unrecognized("went_down_at.current is null"))?;
    let difference = meta.timestamp - went_down_at;
    let warning_after = config.warning_repeat_seconds as f64;
    let critical_after = config.critical_repeat_seconds as f64;

    let mut alerts = Vec::new();
    if down.went_down_at.previous.is_none() {
        if config.critical_enabled && difference >= critical_after {
            alerts.push(went_down(meta, Severity::Critical, difference));
        } else if config.warning_enabled {
            alerts.push(went_down(meta, Severity::Warning, difference));
        }
    } else if config.warning_enabled
        && warning_after <= difference
        && difference < critical_after
        && config.warning_limiter().can_do_task_at(now)
    {
        alerts.push(still_down(meta, Severity::Warning, difference));
        config.warning_limiter_mut().did_task_at(now);
    } else if config.critical_enabled
        && difference >= critical_after
        && config.critical_limiter().can_do_task_at(now)
    {
        alerts.push(still_down(meta, Severity::Critical, difference));
        config.critical_limiter_mut().did_task_at(now);
    }

    Ok(alerts)
}

/// Classifies the down-time part of a successful monitoring round.
///
/// A result whose `went_down_at.previous` is set means the entity was down
/// and has answered again.
pub fn classify_back_up(
    went_down_at: &MetricPair,
    config: &DownDetectionConfig,
    meta: &MetaData,
) -> Vec<Alert> {
    if !config.enabled || went_down_at.previous.is_none() {
        return Vec::new();
    }
    vec![Alert::new(
        AlertCode::SystemBackUpAgain,
        MetricCode::SystemIsDown,
        format!(
            "{} is back up, last successful monitor at: {}.",
            meta.name,
            format_timestamp(meta.timestamp)
        ),
        Severity::Info,
        meta.timestamp,
        &meta.parent_id,
        &meta.id,
        None,
    )]
}
