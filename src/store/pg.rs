//! PostgreSQL backend.
//!
//! Uses the blocking `postgres` client against the schema in
//! `sql/001_base_schema.sql`. A reading and its alerts are written in one
//! transaction, so a reading is never visible without the alerts it raised.

use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};

use super::{
    AlertFilter, AlertRecord, Page, PageRequest, ReadingFilter, StoreError, WaterQualityStore,
    severity_spellings, thresholds_from_rows, values_from_columns,
};
use crate::model::{
    ActivityEntry, Alert, GeoPoint, PARAMETER_CATALOG, Reading, SiteThresholds,
    Threshold, parse_alert_severity,
};
use crate::sites::MiningSite;

/// Tables the service reads and writes.
pub const REQUIRED_TABLES: &[&str] = &[
    "mining_sites",
    "thresholds",
    "water_quality_data",
    "alerts",
    "activity_logs",
];

const ALERT_COLUMNS: &str = "a.id, a.data_id, a.type, a.severity, a.message, a.created_at, \
                             a.acknowledged, a.acknowledged_by, a.acknowledged_at";

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn new(client: Client) -> Self {
        PostgresStore { client }
    }

    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(Client::connect(database_url, NoTls)?))
    }

    /// Connects and checks that every table in `tables` exists, so a missing
    /// migration fails at startup rather than on the first submission.
    pub fn connect_and_verify(database_url: &str, tables: &[&str]) -> Result<Self, StoreError> {
        let mut store = Self::connect(database_url)?;
        for table in tables {
            let row = store.client.query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM information_schema.tables
                     WHERE table_schema = current_schema() AND table_name = $1
                 )",
                &[table],
            )?;
            if !row.get::<_, bool>(0) {
                return Err(StoreError::Other(format!(
                    "table '{table}' is missing; apply sql/001_base_schema.sql"
                )));
            }
        }
        Ok(store)
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    fn thresholds_for(&mut self, site_id: &str) -> Result<SiteThresholds, StoreError> {
        let rows = self.client.query(
            "SELECT parameter, min_value, max_value FROM thresholds WHERE site_id = $1",
            &[&site_id],
        )?;
        thresholds_from_rows(
            rows.iter()
                .map(|row| Threshold::new(row.get(0), row.get(1), row.get(2))),
        )
    }
}

// ---------------------------------------------------------------------------
// Query building
// ---------------------------------------------------------------------------

/// Accumulates `WHERE` conditions with numbered placeholders.
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql + Sync>>,
}

impl Conditions {
    /// `template` uses `$?` for the value's placeholder.
    fn push<T: ToSql + Sync + 'static>(&mut self, template: &str, value: T) {
        self.params.push(Box::new(value));
        let placeholder = format!("${}", self.params.len());
        self.clauses.push(template.replace("$?", &placeholder));
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn next_placeholder(&self, offset: usize) -> String {
        format!("${}", self.params.len() + offset)
    }

    fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

fn reading_conditions(filter: &ReadingFilter) -> Conditions {
    let mut c = Conditions::default();
    if let Some(ids) = &filter.site_ids {
        c.push("w.site_id = ANY($?)", ids.clone());
    }
    if let Some(status) = filter.status {
        c.push("w.status = $?", status.as_str().to_string());
    }
    if let Some(from) = filter.from {
        c.push("w.timestamp >= $?", from);
    }
    if let Some(until) = filter.until {
        c.push("w.timestamp <= $?", until);
    }
    c
}

fn alert_conditions(filter: &AlertFilter) -> Conditions {
    let mut c = Conditions::default();
    if let Some(ids) = &filter.site_ids {
        c.push("w.site_id = ANY($?)", ids.clone());
    }
    if let Some(severity) = filter.severity {
        c.push("a.severity = ANY($?)", severity_spellings(severity));
    }
    if let Some(acknowledged) = filter.acknowledged {
        c.push("a.acknowledged = $?", acknowledged);
    }
    if let Some(from) = filter.from {
        c.push("a.created_at >= $?", from);
    }
    if let Some(until) = filter.until {
        c.push("a.created_at <= $?", until);
    }
    c
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn reading_columns() -> String {
    let mut columns = vec![
        "w.id", "w.site_id", "w.collected_by", "w.timestamp", "w.latitude", "w.longitude",
        "w.status", "w.pathogens", "w.notes",
    ]
    .into_iter()
    .map(String::from)
    .collect::<Vec<_>>();
    columns.extend(PARAMETER_CATALOG.iter().map(|p| format!("w.{}", p.column)));
    columns.join(", ")
}

fn reading_from_row(row: &Row) -> Result<Reading, StoreError> {
    let status: String = row.get("status");
    Ok(Reading {
        id: row.get("id"),
        site_id: row.get("site_id"),
        collected_by: row.get("collected_by"),
        timestamp: row.get("timestamp"),
        location: GeoPoint { latitude: row.get("latitude"), longitude: row.get("longitude") },
        values: values_from_columns(|column| row.get::<_, Option<f64>>(column)),
        pathogens: row.get("pathogens"),
        notes: row.get("notes"),
        status: status.parse()?,
    })
}

fn alert_from_row(row: &Row) -> Result<Alert, StoreError> {
    let severity: String = row.get("severity");
    Ok(Alert {
        id: row.get("id"),
        reading_id: row.get("data_id"),
        parameter: row.get("type"),
        level: parse_alert_severity(&severity)?,
        message: row.get("message"),
        created_at: row.get("created_at"),
        acknowledged: row.get("acknowledged"),
        acknowledged_by: row.get("acknowledged_by"),
        acknowledged_at: row.get("acknowledged_at"),
    })
}

fn count(row: &Row) -> usize {
    usize::try_from(row.get::<_, i64>(0)).unwrap_or(0)
}

impl WaterQualityStore for PostgresStore {
    fn sites(&mut self) -> Result<Vec<MiningSite>, StoreError> {
        let rows = self.client.query(
            "SELECT id, name, COALESCE(description, '') AS description, latitude, longitude,
                    COALESCE(active_monitoring, TRUE) AS active_monitoring
             FROM mining_sites ORDER BY id",
            &[],
        )?;
        let mut sites = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let thresholds = self.thresholds_for(&id)?;
            sites.push(MiningSite {
                id,
                name: row.get("name"),
                description: row.get("description"),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
                active_monitoring: row.get("active_monitoring"),
                thresholds,
            });
        }
        Ok(sites)
    }

    fn insert_reading(&mut self, reading: &Reading, alerts: &[Alert]) -> Result<(), StoreError> {
        let mut tx = self.client.transaction()?;

        let values: Vec<Option<f64>> = PARAMETER_CATALOG
            .iter()
            .map(|p| reading.value(p.key))
            .collect();
        let status = reading.status.as_str();

        let mut columns = vec![
            "id", "site_id", "collected_by", "timestamp", "latitude", "longitude", "status",
            "pathogens", "notes",
        ];
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![
            &reading.id,
            &reading.site_id,
            &reading.collected_by,
            &reading.timestamp,
            &reading.location.latitude,
            &reading.location.longitude,
            &status,
            &reading.pathogens,
            &reading.notes,
        ];
        for (p, value) in PARAMETER_CATALOG.iter().zip(values.iter()) {
            columns.push(p.column);
            params.push(value);
        }
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO water_quality_data ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        tx.execute(sql.as_str(), &params)?;

        for alert in alerts {
            let severity = alert.severity().as_str();
            tx.execute(
                "INSERT INTO alerts (id, data_id, type, severity, message, created_at, acknowledged)
                 VALUES ($1, $2, $3, $4, $5, $6, FALSE)",
                &[
                    &alert.id,
                    &alert.reading_id,
                    &alert.parameter,
                    &severity,
                    &alert.message,
                    &alert.created_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn readings(&mut self, filter: &ReadingFilter, page: PageRequest) -> Result<Page<Reading>, StoreError> {
        let conditions = reading_conditions(filter);
        let where_sql = conditions.sql();

        let total = count(&self.client.query_one(
            format!("SELECT COUNT(*) FROM water_quality_data w{where_sql}").as_str(),
            &conditions.refs(),
        )?);

        let limit = page.limit as i64;
        let offset = page.offset as i64;
        let sql = format!(
            "SELECT {} FROM water_quality_data w{} ORDER BY w.timestamp DESC LIMIT {} OFFSET {}",
            reading_columns(),
            where_sql,
            conditions.next_placeholder(1),
            conditions.next_placeholder(2),
        );
        let mut params = conditions.refs();
        params.push(&limit);
        params.push(&offset);

        let rows = self.client.query(sql.as_str(), &params)?;
        let items = rows.iter().map(reading_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, page))
    }

    fn alert(&mut self, alert_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS}, w.site_id
             FROM alerts a JOIN water_quality_data w ON a.data_id = w.id
             WHERE a.id = $1"
        );
        match self.client.query_opt(sql.as_str(), &[&alert_id])? {
            Some(row) => Ok(Some(AlertRecord {
                alert: alert_from_row(&row)?,
                site_id: row.get("site_id"),
            })),
            None => Ok(None),
        }
    }

    fn alerts(&mut self, filter: &AlertFilter, page: PageRequest) -> Result<Page<AlertRecord>, StoreError> {
        let conditions = alert_conditions(filter);
        let where_sql = conditions.sql();
        let from = "FROM alerts a JOIN water_quality_data w ON a.data_id = w.id";

        let total = count(&self.client.query_one(
            format!("SELECT COUNT(*) {from}{where_sql}").as_str(),
            &conditions.refs(),
        )?);

        let limit = page.limit as i64;
        let offset = page.offset as i64;
        let sql = format!(
            "SELECT {ALERT_COLUMNS}, w.site_id {from}{where_sql}
             ORDER BY a.created_at DESC LIMIT {} OFFSET {}",
            conditions.next_placeholder(1),
            conditions.next_placeholder(2),
        );
        let mut params = conditions.refs();
        params.push(&limit);
        params.push(&offset);

        let rows = self.client.query(sql.as_str(), &params)?;
        let items = rows
            .iter()
            .map(|row| -> Result<AlertRecord, StoreError> {
                Ok(AlertRecord { alert: alert_from_row(row)?, site_id: row.get("site_id") })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, page))
    }

    fn acknowledge_alert(
        &mut self,
        alert_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, StoreError> {
        let updated = self.client.query_opt(
            "UPDATE alerts a
             SET acknowledged = TRUE, acknowledged_by = $2, acknowledged_at = $3
             WHERE a.id = $1 AND a.acknowledged = FALSE
             RETURNING a.id, a.data_id, a.type, a.severity, a.message, a.created_at,
                       a.acknowledged, a.acknowledged_by, a.acknowledged_at",
            &[&alert_id, &user_id, &at],
        )?;
        if let Some(row) = updated {
            return alert_from_row(&row);
        }

        // Nothing updated: either the alert does not exist or it was
        // acknowledged before.
        let exists = self
            .client
            .query_opt("SELECT 1 FROM alerts WHERE id = $1", &[&alert_id])?
            .is_some();
        if exists {
            Err(StoreError::AlreadyAcknowledged { id: alert_id.to_string() })
        } else {
            Err(StoreError::NotFound { entity: "alert", id: alert_id.to_string() })
        }
    }

    fn record_activity(&mut self, entry: &ActivityEntry) -> Result<(), StoreError> {
        let action = entry.action.as_str();
        self.client.execute(
            "INSERT INTO activity_logs
                 (id, user_id, action_type, resource_type, resource_id, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &entry.id,
                &entry.user_id,
                &action,
                &entry.resource_type,
                &entry.resource_id,
                &entry.details,
                &entry.created_at,
            ],
        )?;
        Ok(())
    }
}
