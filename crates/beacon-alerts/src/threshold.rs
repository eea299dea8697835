//! Hysteresis-aware threshold classification for a single metric.

use chrono::{DateTime, Utc};

use crate::config::MetricThresholdConfig;
use crate::observation::MetaData;
use crate::types::{Alert, AlertCode, AlertData, MetricCode, Severity};

/// A metric evaluated against warning and critical bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThresholdMetric {
    /// Open file descriptor usage.
    OpenFileDescriptors,
    /// CPU usage.
    CpuUsage,
    /// RAM usage.
    RamUsage,
    /// Storage usage.
    StorageUsage,
}

impl ThresholdMetric {
    /// Human readable name used in alert messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OpenFileDescriptors => "open file descriptors",
            Self::CpuUsage => "CPU usage",
            Self::RamUsage => "RAM usage",
            Self::StorageUsage => "storage usage",
        }
    }

    /// Unit appended to the value in alert messages.
    ///
    /// Open file descriptors are reported as a count.
    #[must_use]
    pub const fn unit(&self) -> &'static str {
        match self {
            Self::OpenFileDescriptors => "",
            Self::CpuUsage | Self::RamUsage | Self::StorageUsage => "%",
        }
    }

    /// Alert kind raised when the value enters a band from below.
    #[must_use]
    pub const fn increased_code(&self) -> AlertCode {
        match self {
            Self::OpenFileDescriptors => AlertCode::OpenFileDescriptorsIncreasedAboveThreshold,
            Self::CpuUsage => AlertCode::SystemCpuUsageIncreasedAboveThreshold,
            Self::RamUsage => AlertCode::SystemRamUsageIncreasedAboveThreshold,
            Self::StorageUsage => AlertCode::SystemStorageUsageIncreasedAboveThreshold,
        }
    }

    /// Alert kind raised when the value leaves a band downwards.
    #[must_use]
    pub const fn decreased_code(&self) -> AlertCode {
        match self {
            Self::OpenFileDescriptors => AlertCode::OpenFileDescriptorsDecreasedBelowThreshold,
            Self::CpuUsage => AlertCode::SystemCpuUsageDecreasedBelowThreshold,
            Self::RamUsage => AlertCode::SystemRamUsageDecreasedBelowThreshold,
            Self::StorageUsage => AlertCode::SystemStorageUsageDecreasedBelowThreshold,
        }
    }

    /// Grouping code of the metric.
    #[must_use]
    pub const fn metric_code(&self) -> MetricCode {
        match self {
            Self::OpenFileDescriptors => MetricCode::OpenFileDescriptors,
            Self::CpuUsage => MetricCode::SystemCpuUsage,
            Self::RamUsage => MetricCode::SystemRamUsage,
            Self::StorageUsage => MetricCode::SystemStorageUsage,
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Increased,
    Decreased,
}

fn threshold_alert(
    metric: ThresholdMetric,
    direction: Direction,
    severity: Severity,
    band: Severity,
    current: f64,
    previous: Option<f64>,
    meta: &MetaData,
) -> Alert {
    let (code, verb, preposition) = match direction {
        Direction::Increased => (metric.increased_code(), "increased", "above"),
        Direction::Decreased => (metric.decreased_code(), "decreased", "below"),
    };
    let message = format!(
        "{} {} {verb} {preposition} {band} threshold. Current value: {current:.2}{}.",
        meta.name,
        metric.label(),
        metric.unit(),
    );
    Alert::new(
        code,
        metric.metric_code(),
        message,
        severity,
        meta.timestamp,
        &meta.parent_id,
        &meta.id,
        Some(AlertData {
            previous,
            current: Some(current),
            threshold_severity: Some(band),
            down_for_secs: None,
        }),
    )
}

/// Classifies one metric reading.
///
/// An unknown `previous` counts as below every threshold. Warning alerts
/// fire once per crossing into the band; critical alerts repeat whenever the
/// config's critical limiter allows it at `now`.
pub fn classify(
    metric: ThresholdMetric,
    current: f64,
    previous: Option<f64>,
    config: &mut MetricThresholdConfig,
    meta: &MetaData,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let warning = config.warning_threshold;
    let critical = config.critical_threshold;
    let prev = previous.unwrap_or(f64::NEG_INFINITY);
    let mut alerts = Vec::new();

    if config.warning_enabled {
        if warning <= current && current < critical && prev < warning {
            alerts.push(threshold_alert(
                metric,
                Direction::Increased,
                Severity::Warning,
                Severity::Warning,
                current,
                previous,
                meta,
            ));
        } else if current < warning && warning <= prev {
            alerts.push(threshold_alert(
                metric,
                Direction::Decreased,
                Severity::Info,
                Severity::Warning,
                current,
                previous,
                meta,
            ));
        }
    }

    if config.critical_enabled {
        if current >= critical && config.critical_limiter().can_do_task_at(now) {
            alerts.push(threshold_alert(
                metric,
                Direction::Increased,
                Severity::Critical,
                Severity::Critical,
                current,
                previous,
                meta,
            ));
            config.critical_limiter_mut().did_task_at(now);
        } else if warning < current && current < critical && critical <= prev {
            alerts.push(threshold_alert(
                metric,
                Direction::Decreased,
                Severity::Info,
                Severity::Critical,
                current,
                previous,
                meta,
            ));
        }
    }

    alerts
}
