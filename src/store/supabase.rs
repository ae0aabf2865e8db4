//! Supabase backend.
//!
//! Talks to the PostgREST API Supabase exposes over the same schema as the
//! PostgreSQL backend. PostgREST has no multi-request transactions, so a
//! reading is inserted before its alerts; if the alert insert fails the
//! reading stays stored without them and the error is returned to the
//! caller.
//!
//! API reference: https://postgrest.org/en/stable/references/api.html

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    AlertFilter, AlertRecord, Page, PageRequest, ReadingFilter, StoreError, WaterQualityStore,
    severity_spellings, thresholds_from_rows, values_from_columns,
};
use crate::model::{
    ActivityEntry, Alert, GeoPoint, PARAMETER_CATALOG, Reading, Threshold,
    parse_alert_severity,
};
use crate::sites::MiningSite;

const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Row shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct SiteRow {
    id: String,
    name: String,
    description: Option<String>,
    latitude: f64,
    longitude: f64,
    active_monitoring: Option<bool>,
    #[serde(default)]
    thresholds: Vec<ThresholdRow>,
}

#[derive(Debug, Deserialize)]
struct ThresholdRow {
    parameter: String,
    min_value: Option<f64>,
    max_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ReadingRow {
    id: String,
    site_id: String,
    collected_by: String,
    timestamp: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    status: String,
    pathogens: Option<String>,
    notes: Option<String>,
    /// Measurement columns and anything else the row carries.
    #[serde(flatten)]
    columns: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AlertRow {
    id: String,
    data_id: String,
    #[serde(rename = "type")]
    parameter: String,
    severity: String,
    message: String,
    created_at: DateTime<Utc>,
    acknowledged: Option<bool>,
    acknowledged_by: Option<String>,
    acknowledged_at: Option<DateTime<Utc>>,
    /// Embedded parent reading, present when selected.
    water_quality_data: Option<ParentReading>,
}

#[derive(Debug, Deserialize)]
struct ParentReading {
    site_id: String,
}

impl SiteRow {
    fn into_site(self) -> Result<MiningSite, StoreError> {
        let thresholds = thresholds_from_rows(
            self.thresholds
                .into_iter()
                .map(|t| Threshold::new(&t.parameter, t.min_value, t.max_value)),
        )?;
        Ok(MiningSite {
            id: self.id,
            name: self.name,
            description: self.description.unwrap_or_default(),
            latitude: self.latitude,
            longitude: self.longitude,
            active_monitoring: self.active_monitoring.unwrap_or(true),
            thresholds,
        })
    }
}

impl ReadingRow {
    fn into_reading(self) -> Result<Reading, StoreError> {
        let columns = self.columns;
        Ok(Reading {
            id: self.id,
            site_id: self.site_id,
            timestamp: self.timestamp,
            collected_by: self.collected_by,
            location: GeoPoint { latitude: self.latitude, longitude: self.longitude },
            values: values_from_columns(|column| columns.get(column).and_then(Value::as_f64)),
            pathogens: self.pathogens,
            notes: self.notes,
            status: self.status.parse()?,
        })
    }
}

impl AlertRow {
    fn into_record(self) -> Result<AlertRecord, StoreError> {
        let site_id = self.water_quality_data.map(|w| w.site_id).unwrap_or_default();
        let alert = Alert {
            level: parse_alert_severity(&self.severity)?,
            id: self.id,
            reading_id: self.data_id,
            parameter: self.parameter,
            message: self.message,
            created_at: self.created_at,
            acknowledged: self.acknowledged.unwrap_or(false),
            acknowledged_by: self.acknowledged_by,
            acknowledged_at: self.acknowledged_at,
        };
        Ok(AlertRecord { alert, site_id })
    }
}

/// Serializes a reading as a `water_quality_data` row.
fn reading_to_row(reading: &Reading) -> Value {
    let mut row = Map::new();
    row.insert("id".into(), json!(reading.id));
    row.insert("site_id".into(), json!(reading.site_id));
    row.insert("collected_by".into(), json!(reading.collected_by));
    row.insert("timestamp".into(), json!(reading.timestamp.to_rfc3339()));
    row.insert("latitude".into(), json!(reading.location.latitude));
    row.insert("longitude".into(), json!(reading.location.longitude));
    row.insert("status".into(), json!(reading.status.as_str()));
    row.insert("pathogens".into(), json!(reading.pathogens));
    row.insert("notes".into(), json!(reading.notes));
    for p in PARAMETER_CATALOG {
        row.insert(p.column.into(), json!(reading.value(p.key)));
    }
    Value::Object(row)
}

fn alert_to_row(alert: &Alert) -> Value {
    json!({
        "id": alert.id,
        "data_id": alert.reading_id,
        "type": alert.parameter,
        "severity": alert.severity().as_str(),
        "message": alert.message,
        "created_at": alert.created_at.to_rfc3339(),
        "acknowledged": alert.acknowledged,
    })
}

/// PostgREST `in` list, e.g. `in.("site-1","site-2")`.
fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v.replace('"', "\\\""))).collect();
    format!("in.({})", quoted.join(","))
}

/// Total row count from a `Content-Range: 0-24/312` header.
fn parse_content_range_total(header: &str) -> Option<usize> {
    header.rsplit('/').next()?.parse().ok()
}

// ============================================================================
// Client
// ============================================================================

pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseStore {
    /// `base_url` is the project URL, e.g. `https://abc.supabase.co`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(SupabaseStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorized(request).send()?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            Err(StoreError::HttpStatus { status, body })
        }
    }

    fn insert(&self, table: &str, body: &Value) -> Result<(), StoreError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(body);
        self.send(request)?;
        Ok(())
    }

    /// Runs a counted select and returns the rows with the total count.
    fn select_page<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(String, String)],
        page: PageRequest,
    ) -> Result<(Vec<T>, usize), StoreError> {
        let mut params = query.to_vec();
        params.push(("limit".into(), page.limit.to_string()));
        params.push(("offset".into(), page.offset.to_string()));

        let request = self
            .client
            .get(self.table_url(table))
            .header("Prefer", "count=exact")
            .query(&params);
        let response = self.send(request)?;

        let total = response
            .headers()
            .get("Content-Range")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_content_range_total);
        let rows: Vec<T> = response.json()?;
        let total = total.unwrap_or(page.offset + rows.len());
        Ok((rows, total))
    }
}

fn reading_query(filter: &ReadingFilter) -> Vec<(String, String)> {
    let mut query = vec![
        ("select".to_string(), "*".to_string()),
        ("order".to_string(), "timestamp.desc".to_string()),
    ];
    if let Some(ids) = &filter.site_ids {
        query.push(("site_id".into(), in_list(ids)));
    }
    if let Some(status) = filter.status {
        query.push(("status".into(), format!("eq.{}", status.as_str())));
    }
    if let Some(from) = filter.from {
        query.push(("timestamp".into(), format!("gte.{}", from.to_rfc3339())));
    }
    if let Some(until) = filter.until {
        query.push(("timestamp".into(), format!("lte.{}", until.to_rfc3339())));
    }
    query
}

fn alert_query(filter: &AlertFilter) -> Vec<(String, String)> {
    let mut query = vec![
        ("select".to_string(), "*,water_quality_data!inner(site_id)".to_string()),
        ("order".to_string(), "created_at.desc".to_string()),
    ];
    if let Some(ids) = &filter.site_ids {
        query.push(("water_quality_data.site_id".into(), in_list(ids)));
    }
    if let Some(severity) = filter.severity {
        query.push(("severity".into(), in_list(&severity_spellings(severity))));
    }
    match filter.acknowledged {
        Some(true) => query.push(("acknowledged".into(), "is.true".into())),
        // Older rows may hold NULL for never-acknowledged alerts.
        Some(false) => query.push(("acknowledged".into(), "not.is.true".into())),
        None => {}
    }
    if let Some(from) = filter.from {
        query.push(("created_at".into(), format!("gte.{}", from.to_rfc3339())));
    }
    if let Some(until) = filter.until {
        query.push(("created_at".into(), format!("lte.{}", until.to_rfc3339())));
    }
    query
}

impl WaterQualityStore for SupabaseStore {
    fn sites(&mut self) -> Result<Vec<MiningSite>, StoreError> {
        let request = self
            .client
            .get(self.table_url("mining_sites"))
            .query(&[
                ("select", "*,thresholds(parameter,min_value,max_value)"),
                ("order", "id.asc"),
            ]);
        let rows: Vec<SiteRow> = self.send(request)?.json()?;
        rows.into_iter().map(SiteRow::into_site).collect()
    }

    fn insert_reading(&mut self, reading: &Reading, alerts: &[Alert]) -> Result<(), StoreError> {
        self.insert("water_quality_data", &reading_to_row(reading))?;
        if !alerts.is_empty() {
            let rows: Vec<Value> = alerts.iter().map(alert_to_row).collect();
            self.insert("alerts", &Value::Array(rows))?;
        }
        Ok(())
    }

    fn readings(&mut self, filter: &ReadingFilter, page: PageRequest) -> Result<Page<Reading>, StoreError> {
        let (rows, total) = self.select_page::<ReadingRow>("water_quality_data", &reading_query(filter), page)?;
        let items = rows
            .into_iter()
            .map(ReadingRow::into_reading)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, page))
    }

    fn alert(&mut self, alert_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        let request = self
            .client
            .get(self.table_url("alerts"))
            .query(&[
                ("select", "*,water_quality_data(site_id)".to_string()),
                ("id", format!("eq.{alert_id}")),
            ]);
        let rows: Vec<AlertRow> = self.send(request)?.json()?;
        rows.into_iter().next().map(AlertRow::into_record).transpose()
    }

    fn alerts(&mut self, filter: &AlertFilter, page: PageRequest) -> Result<Page<AlertRecord>, StoreError> {
        let (rows, total) = self.select_page::<AlertRow>("alerts", &alert_query(filter), page)?;
        let items = rows
            .into_iter()
            .map(AlertRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, page))
    }

    fn acknowledge_alert(
        &mut self,
        alert_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, StoreError> {
        // The `acknowledged` filter makes the update conditional: an already
        // acknowledged alert matches no row and comes back empty.
        let request = self
            .client
            .patch(self.table_url("alerts"))
            .query(&[
                ("id", format!("eq.{alert_id}")),
                ("acknowledged", "not.is.true".to_string()),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({
                "acknowledged": true,
                "acknowledged_by": user_id,
                "acknowledged_at": at.to_rfc3339(),
            }));
        let rows: Vec<AlertRow> = self.send(request)?.json()?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(row.into_record()?.alert);
        }

        match self.alert(alert_id)? {
            Some(_) => Err(StoreError::AlreadyAcknowledged { id: alert_id.to_string() }),
            None => Err(StoreError::NotFound { entity: "alert", id: alert_id.to_string() }),
        }
    }

    fn record_activity(&mut self, entry: &ActivityEntry) -> Result<(), StoreError> {
        self.insert(
            "activity_logs",
            &json!({
                "id": entry.id,
                "user_id": entry.user_id,
                "action_type": entry.action.as_str(),
                "resource_type": entry.resource_type,
                "resource_id": entry.resource_id,
                "details": entry.details,
                "created_at": entry.created_at.to_rfc3339(),
            }),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
