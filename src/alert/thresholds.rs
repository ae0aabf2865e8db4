//! Water-quality threshold checking.
//!
//! Classifies each parameter of a reading against the site's configured
//! range and synthesizes one alert per out-of-range parameter. Everything
//! here is a pure function of its inputs; persisting the alerts is the
//! store's job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::alert::messages::alert_message;
use crate::model::{Alert, Reading, SiteThresholds, Status, Threshold, new_id};

/// Below `min * CRITICAL_LOW_FACTOR` a value is critical rather than warning.
/// Negative bounds swap factors so the band always lies outside the range.
pub const CRITICAL_LOW_FACTOR: f64 = 0.9;

/// Above `max * CRITICAL_HIGH_FACTOR` a value is critical rather than warning.
pub const CRITICAL_HIGH_FACTOR: f64 = 1.1;

fn critical_floor(min: f64) -> f64 {
    if min >= 0.0 { min * CRITICAL_LOW_FACTOR } else { min * CRITICAL_HIGH_FACTOR }
}

fn critical_ceiling(max: f64) -> f64 {
    if max >= 0.0 { max * CRITICAL_HIGH_FACTOR } else { max * CRITICAL_LOW_FACTOR }
}

/// Per-parameter and overall classification of one reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub overall: Status,
    pub per_parameter: BTreeMap<String, Status>,
}

impl Classification {
    /// Parameters whose status is not normal, in key order.
    pub fn breaches(&self) -> impl Iterator<Item = (&str, Status)> {
        self.per_parameter
            .iter()
            .filter(|(_, status)| **status != Status::Normal)
            .map(|(parameter, status)| (parameter.as_str(), *status))
    }
}

/// Classifies a single value against a threshold.
///
/// The 10% tolerance band only separates warning from critical; any value
/// outside `[min, max]` is at least a warning and any value inside it is
/// normal, whatever the sign of the bounds. An absent bound is never
/// checked.
pub fn classify_parameter(value: f64, threshold: &Threshold) -> Status {
    let (min, max) = (threshold.min, threshold.max);
    let critical = min.is_some_and(|min| value < critical_floor(min))
        || max.is_some_and(|max| value > critical_ceiling(max));
    let outside = min.is_some_and(|min| value < min) || max.is_some_and(|max| value > max);

    if critical {
        Status::Critical
    } else if outside {
        Status::Warning
    } else {
        Status::Normal
    }
}

/// Classifies every parameter present in both the reading and the site's
/// thresholds. Parameters missing on either side are not evaluated; an
/// empty evaluation is normal.
pub fn classify_reading(reading: &Reading, thresholds: &SiteThresholds) -> Classification {
    let per_parameter: BTreeMap<String, Status> = reading
        .values
        .iter()
        .filter_map(|(parameter, value)| {
            thresholds
                .get(parameter)
                .map(|threshold| (parameter.clone(), classify_parameter(*value, threshold)))
        })
        .collect();

    let overall = per_parameter.values().copied().max().unwrap_or_default();

    Classification { overall, per_parameter }
}

/// Builds one unacknowledged alert for every non-normal parameter.
///
/// `now` becomes the alerts' creation time; pass the submission time so a
/// reading and its alerts share a timestamp.
pub fn generate_alerts(
    reading: &Reading,
    per_parameter: &BTreeMap<String, Status>,
    thresholds: &SiteThresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    per_parameter
        .iter()
        .filter(|(_, status)| **status != Status::Normal)
        .filter_map(|(parameter, status)| {
            let value = reading.value(parameter)?;
            let threshold = thresholds.get(parameter)?;
            Some(Alert {
                id: new_id(),
                reading_id: reading.id.clone(),
                parameter: parameter.clone(),
                level: *status,
                message: alert_message(parameter, value, threshold),
                created_at: now,
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
