//! In-process store backed by vectors.
//!
//! Holds everything in memory for the lifetime of the value. Used by the
//! tests and by the CLI's `memory` backend for dry runs.

use chrono::{DateTime, Utc};

use super::{AlertFilter, AlertRecord, Page, PageRequest, ReadingFilter, StoreError, WaterQualityStore};
use crate::alert::acknowledge_at;
use crate::model::{ActivityEntry, Alert, Reading};
use crate::sites::MiningSite;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sites: Vec<MiningSite>,
    readings: Vec<Reading>,
    alerts: Vec<Alert>,
    activity: Vec<ActivityEntry>,
}

impl MemoryStore {
    pub fn new(sites: Vec<MiningSite>) -> Self {
        MemoryStore { sites, ..Default::default() }
    }

    /// Activity entries in insertion order.
    pub fn activity(&self) -> &[ActivityEntry] {
        &self.activity
    }

    fn site_of_reading(&self, reading_id: &str) -> Option<&str> {
        self.readings
            .iter()
            .find(|r| r.id == reading_id)
            .map(|r| r.site_id.as_str())
    }

    fn record_for(&self, alert: &Alert) -> AlertRecord {
        AlertRecord {
            alert: alert.clone(),
            site_id: self.site_of_reading(&alert.reading_id).unwrap_or_default().to_string(),
        }
    }
}

impl WaterQualityStore for MemoryStore {
    fn sites(&mut self) -> Result<Vec<MiningSite>, StoreError> {
        Ok(self.sites.clone())
    }

    fn insert_reading(&mut self, reading: &Reading, alerts: &[Alert]) -> Result<(), StoreError> {
        if self.readings.iter().any(|r| r.id == reading.id) {
            return Err(StoreError::Other(format!("reading {} already exists", reading.id)));
        }
        if let Some(stray) = alerts.iter().find(|a| a.reading_id != reading.id) {
            return Err(StoreError::Other(format!(
                "alert {} does not belong to reading {}",
                stray.id, reading.id
            )));
        }
        self.readings.push(reading.clone());
        self.alerts.extend_from_slice(alerts);
        Ok(())
    }

    fn readings(&mut self, filter: &ReadingFilter, page: PageRequest) -> Result<Page<Reading>, StoreError> {
        let mut matching: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(Page::slice(matching, page))
    }

    fn alert(&mut self, alert_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        Ok(self
            .alerts
            .iter()
            .find(|a| a.id == alert_id)
            .map(|a| self.record_for(a)))
    }

    fn alerts(&mut self, filter: &AlertFilter, page: PageRequest) -> Result<Page<AlertRecord>, StoreError> {
        let mut matching: Vec<AlertRecord> = self
            .alerts
            .iter()
            .map(|a| self.record_for(a))
            .filter(|record| filter.matches(record))
            .collect();
        matching.sort_by(|a, b| b.alert.created_at.cmp(&a.alert.created_at));
        Ok(Page::slice(matching, page))
    }

    fn acknowledge_alert(
        &mut self,
        alert_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, StoreError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| StoreError::NotFound { entity: "alert", id: alert_id.to_string() })?;
        acknowledge_at(alert, user_id, at)?;
        Ok(alert.clone())
    }

    fn record_activity(&mut self, entry: &ActivityEntry) -> Result<(), StoreError> {
        self.activity.push(entry.clone());
        Ok(())
    }
}
