//! Persistence for sites, readings, alerts and the activity log.
//!
//! The evaluator never touches storage; it hands plain values to a
//! [`WaterQualityStore`]. Three backends implement the trait:
//!
//! - [`memory::MemoryStore`]: in-process vectors, for tests and dry runs.
//! - [`pg::PostgresStore`]: the relational schema in
//!   `sql/001_base_schema.sql`, via the blocking `postgres` client.
//! - [`supabase::SupabaseStore`]: the same schema behind Supabase's
//!   PostgREST API, via `reqwest::blocking`.

pub mod memory;
pub mod pg;
pub mod supabase;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::AlertError;
use crate::model::{
    ActivityEntry, Alert, ModelError, PARAMETER_CATALOG, Reading, SiteThresholds, Status, Threshold,
};
use crate::sites::MiningSite;

pub use memory::MemoryStore;
pub use pg::PostgresStore;
pub use supabase::SupabaseStore;

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    /// Clamps `limit` to `1..=MAX_PAGE_LIMIT`.
    pub fn new(limit: usize, offset: usize) -> Self {
        PageRequest { limit: limit.clamp(1, MAX_PAGE_LIMIT), offset }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest { limit: DEFAULT_PAGE_LIMIT, offset: 0 }
    }
}

/// One page of results, newest first, with the total matching count.
///
/// `pages` is the number of `limit`-sized pages needed to cover `total`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub pages: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize, request: PageRequest) -> Self {
        let pages = if request.limit == 0 { 0 } else { total.div_ceil(request.limit) };
        Page { items, total, limit: request.limit, offset: request.offset, pages }
    }

    /// Applies `request` to an already filtered and sorted list.
    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(request.offset).take(request.limit).collect();
        Page::new(items, total, request)
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Reading query. `site_ids: None` means every site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub site_ids: Option<Vec<String>>,
    pub status: Option<Status>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ReadingFilter {
    pub fn matches(&self, reading: &Reading) -> bool {
        site_matches(&self.site_ids, &reading.site_id)
            && self.status.is_none_or(|s| reading.status == s)
            && in_range(reading.timestamp, self.from, self.until)
    }
}

/// Alert query. `severity` uses the internal status vocabulary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub site_ids: Option<Vec<String>>,
    pub severity: Option<Status>,
    pub acknowledged: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AlertFilter {
    pub fn matches(&self, record: &AlertRecord) -> bool {
        let alert = &record.alert;
        site_matches(&self.site_ids, &record.site_id)
            && self.severity.is_none_or(|s| alert.level == s)
            && self.acknowledged.is_none_or(|a| alert.acknowledged == a)
            && in_range(alert.created_at, self.from, self.until)
    }
}

fn site_matches(site_ids: &Option<Vec<String>>, site_id: &str) -> bool {
    site_ids.as_ref().is_none_or(|ids| ids.iter().any(|s| s == site_id))
}

fn in_range(at: DateTime<Utc>, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> bool {
    from.is_none_or(|f| at >= f) && until.is_none_or(|u| at <= u)
}

/// An alert together with the site of the reading that raised it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    #[serde(flatten)]
    pub alert: Alert,
    pub site_id: String,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Data access used by the submission pipeline and the listing services.
pub trait WaterQualityStore {
    fn sites(&mut self) -> Result<Vec<MiningSite>, StoreError>;

    fn site(&mut self, site_id: &str) -> Result<Option<MiningSite>, StoreError> {
        Ok(self.sites()?.into_iter().find(|s| s.id == site_id))
    }

    /// Persists a reading together with the alerts it raised.
    fn insert_reading(&mut self, reading: &Reading, alerts: &[Alert]) -> Result<(), StoreError>;

    fn readings(&mut self, filter: &ReadingFilter, page: PageRequest) -> Result<Page<Reading>, StoreError>;

    fn alert(&mut self, alert_id: &str) -> Result<Option<AlertRecord>, StoreError>;

    fn alerts(&mut self, filter: &AlertFilter, page: PageRequest) -> Result<Page<AlertRecord>, StoreError>;

    /// Performs the one-way acknowledged transition. Fails with `NotFound`
    /// or `AlreadyAcknowledged`; never acknowledges twice.
    fn acknowledge_alert(
        &mut self,
        alert_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, StoreError>;

    fn record_activity(&mut self, entry: &ActivityEntry) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Column mapping shared by the SQL-shaped backends
// ---------------------------------------------------------------------------

/// Builds a reading's value map from a row, skipping null columns.
pub(crate) fn values_from_columns(
    mut column: impl FnMut(&'static str) -> Option<f64>,
) -> std::collections::BTreeMap<String, f64> {
    PARAMETER_CATALOG
        .iter()
        .filter_map(|p| column(p.column).map(|v| (p.key.to_string(), v)))
        .collect()
}

/// Collects stored threshold rows into a site's thresholds keyed by
/// canonical parameter. Rows may use the column spelling (`ph`).
pub(crate) fn thresholds_from_rows(
    rows: impl IntoIterator<Item = Threshold>,
) -> Result<SiteThresholds, StoreError> {
    Ok(rows.into_iter().collect::<SiteThresholds>().canonicalize()?)
}

/// Storage severity strings matching `status`, including legacy spellings.
pub(crate) fn severity_spellings(status: Status) -> Vec<String> {
    match status {
        Status::Normal => Vec::new(),
        Status::Warning => vec!["medium".to_string(), "warning".to_string()],
        Status::Critical => vec!["high".to_string(), "critical".to_string()],
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    #[error("alert {id} is already acknowledged")]
    AlreadyAcknowledged { id: String },

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] ::postgres::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error: {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    Model(#[from] ModelError),

    #[error("{0}")]
    Other(String),
}

impl From<AlertError> for StoreError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::AlreadyAcknowledged { id } => StoreError::AlreadyAcknowledged { id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps_limit() {
        assert_eq!(PageRequest::new(0, 0).limit, 1);
        assert_eq!(PageRequest::new(5_000, 10).limit, MAX_PAGE_LIMIT);
        assert_eq!(PageRequest::default().limit, DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn test_page_count_rounds_up() {
        let page = Page::slice((0..25).collect::<Vec<_>>(), PageRequest::new(10, 20));
        assert_eq!(page.items, vec![20, 21, 22, 23, 24]);
        assert_eq!(page.total, 25);
        assert_eq!(page.pages, 3);
    }

    #[test]
    fn test_page_serializes_page_count() {
        let page = Page::slice((0..25).collect::<Vec<_>>(), PageRequest::new(10, 0));
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pages"], 3);
        assert_eq!(json["total"], 25);
        assert_eq!(json["limit"], 10);
        assert_eq!(json["offset"], 0);

        let empty = Page::slice(Vec::<u32>::new(), PageRequest::default());
        assert_eq!(serde_json::to_value(&empty).unwrap()["pages"], 0);
    }

    #[test]
    fn test_offset_past_end_is_empty_page() {
        let page = Page::slice(vec![1, 2, 3], PageRequest::new(10, 50));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_threshold_rows_use_canonical_keys() {
        let thresholds = thresholds_from_rows(vec![
            Threshold::new("ph", Some(6.5), Some(8.5)),
            Threshold::new("conductivity", None, Some(800.0)),
        ])
        .expect("column-spelled rows should load");
        assert!(thresholds.contains("pH"));
        assert!(!thresholds.contains("ph"));

        let unknown = thresholds_from_rows(vec![Threshold::new("radon", None, Some(1.0))]);
        assert!(matches!(unknown, Err(StoreError::Model(ModelError::UnknownParameter(_)))));
    }

    #[test]
    fn test_severity_spellings_cover_legacy_rows() {
        assert_eq!(severity_spellings(Status::Critical), vec!["high", "critical"]);
        assert!(severity_spellings(Status::Normal).is_empty());
    }
}
