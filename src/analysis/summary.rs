//! Dashboard summaries and parameter time series.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Reading, Status};
use crate::sites::MiningSite;
use crate::store::AlertRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
}

impl StatusCounts {
    fn add(&mut self, status: Status) {
        match status {
            Status::Normal => self.normal += 1,
            Status::Warning => self.warning += 1,
            Status::Critical => self.critical += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSummary {
    pub site_id: String,
    pub name: String,
    pub active_monitoring: bool,
    pub reading_count: usize,
    /// Status of the most recent reading, if the site has any.
    pub latest_status: Option<Status>,
    pub latest_reading_at: Option<DateTime<Utc>>,
    pub open_alerts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_readings: usize,
    pub by_status: StatusCounts,
    pub unacknowledged_alerts: usize,
    pub sites: Vec<SiteSummary>,
}

/// Aggregates readings and alerts into the dashboard overview.
///
/// Sites appear in the order given. Readings and alerts for sites not in
/// `sites` still count toward the totals.
pub fn dashboard_summary(sites: &[MiningSite], readings: &[Reading], alerts: &[AlertRecord]) -> DashboardSummary {
    let mut by_status = StatusCounts::default();
    for reading in readings {
        by_status.add(reading.status);
    }

    let site_summaries = sites
        .iter()
        .map(|site| {
            let site_readings = readings.iter().filter(|r| r.site_id == site.id);
            let latest = site_readings.clone().max_by_key(|r| r.timestamp);
            SiteSummary {
                site_id: site.id.clone(),
                name: site.name.clone(),
                active_monitoring: site.active_monitoring,
                reading_count: site_readings.count(),
                latest_status: latest.map(|r| r.status),
                latest_reading_at: latest.map(|r| r.timestamp),
                open_alerts: alerts
                    .iter()
                    .filter(|a| a.site_id == site.id && !a.alert.acknowledged)
                    .count(),
            }
        })
        .collect();

    DashboardSummary {
        total_readings: readings.len(),
        by_status,
        unacknowledged_alerts: alerts.iter().filter(|a| !a.alert.acknowledged).count(),
        sites: site_summaries,
    }
}

/// One measurement of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub site_id: String,
    pub value: f64,
}

/// Oldest-first measurements of `parameter`, optionally limited to one
/// site. Readings that did not measure the parameter are skipped.
pub fn parameter_series(readings: &[Reading], site_id: Option<&str>, parameter: &str) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = readings
        .iter()
        .filter(|r| site_id.is_none_or(|s| r.site_id == s))
        .filter_map(|r| {
            r.value(parameter).map(|value| SeriesPoint {
                timestamp: r.timestamp,
                site_id: r.site_id.clone(),
                value,
            })
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Returns `None` for an empty series.
pub fn parameter_statistics(points: &[SeriesPoint]) -> Option<SeriesStatistics> {
    if points.is_empty() {
        return None;
    }
    let (min, max, sum) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), p| (min.min(p.value), max.max(p.value), sum + p.value),
    );
    Some(SeriesStatistics {
        count: points.len(),
        min,
        max,
        mean: sum / points.len() as f64,
    })
}
