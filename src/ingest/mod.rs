//! Reading submission and alert handling services.
//!
//! Takes a data-entry payload, checks it against the site and the user's
//! permissions, classifies it, and persists the reading with its alerts.
//! Each accepted action is recorded in the activity log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::{User, can_acknowledge, can_submit_readings, can_view_site, visible_sites};
use crate::alert::{Classification, classify_reading, generate_alerts};
use crate::logging::{log_acknowledgment, log_rejection, log_store_failure, log_submission};
use crate::model::{
    ActivityAction, ActivityEntry, Alert, GeoPoint, Reading, Status, canonical_key, new_id,
};
use crate::sites::MiningSite;
use crate::store::{AlertFilter, AlertRecord, Page, PageRequest, ReadingFilter, StoreError, WaterQualityStore};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A reading as entered in the data-entry form.
///
/// Values may be keyed by parameter key (`"pH"`) or storage column
/// (`"ph"`). A `null` value means "not measured".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingSubmission {
    pub site_id: String,
    /// Sampling time; defaults to the submission time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Sampling point; defaults to the site's coordinates.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub pathogens: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Reject a submission that leaves out a parameter the site has a
    /// threshold for.
    pub require_complete: bool,
}

/// A classified reading that has not been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub reading: Reading,
    pub classification: Classification,
    pub alerts: Vec<Alert>,
}

/// Result returned to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionOutcome {
    pub reading_id: String,
    pub status: Status,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("unknown site '{0}'")]
    UnknownSite(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("parameter '{0}' is submitted more than once")]
    DuplicateParameter(String),
    #[error("value for '{0}' is not a finite number")]
    NonFiniteValue(String),
    #[error("missing value for '{0}'")]
    MissingParameter(String),
    #[error("user '{user}' may not {action} for site '{site}'")]
    Forbidden {
        user: String,
        action: &'static str,
        site: String,
    },
    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },
    #[error("alert {id} is already acknowledged")]
    AlreadyAcknowledged { id: String },
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for SubmissionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => SubmissionError::NotFound { entity, id },
            StoreError::AlreadyAcknowledged { id } => SubmissionError::AlreadyAcknowledged { id },
            other => SubmissionError::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Checks submitted values and returns the measured ones keyed canonically.
///
/// A parameter may be submitted once, under either spelling; `null` counts
/// as a submission.
pub fn validate_values(
    site: &MiningSite,
    submitted: &BTreeMap<String, Option<f64>>,
    options: SubmitOptions,
) -> Result<BTreeMap<String, f64>, SubmissionError> {
    let mut seen = BTreeSet::new();
    let mut values = BTreeMap::new();
    for (key, value) in submitted {
        let canonical = canonical_key(key).ok_or_else(|| SubmissionError::UnknownParameter(key.clone()))?;
        if !seen.insert(canonical) {
            return Err(SubmissionError::DuplicateParameter(canonical.to_string()));
        }
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(SubmissionError::NonFiniteValue(canonical.to_string()));
            }
            values.insert(canonical.to_string(), *v);
        }
    }

    if options.require_complete {
        if let Some(missing) = site.thresholds.iter().find(|t| !values.contains_key(&t.parameter)) {
            return Err(SubmissionError::MissingParameter(missing.parameter.clone()));
        }
    }
    Ok(values)
}

/// Builds and classifies a reading for `site` without storing it.
pub fn evaluate_submission(
    site: &MiningSite,
    submission: &ReadingSubmission,
    collected_by: &str,
    options: SubmitOptions,
    now: DateTime<Utc>,
) -> Result<Evaluation, SubmissionError> {
    if submission.site_id != site.id {
        return Err(SubmissionError::UnknownSite(submission.site_id.clone()));
    }
    let values = validate_values(site, &submission.values, options)?;

    let mut reading = Reading {
        id: new_id(),
        site_id: site.id.clone(),
        timestamp: submission.timestamp.unwrap_or(now),
        collected_by: collected_by.to_string(),
        location: submission.location.unwrap_or_else(|| site.location()),
        values,
        pathogens: submission.pathogens.clone(),
        notes: submission.notes.clone(),
        status: Status::Normal,
    };
    let classification = classify_reading(&reading, &site.thresholds);
    reading.status = classification.overall;
    let alerts = generate_alerts(&reading, &classification.per_parameter, &site.thresholds, now);

    Ok(Evaluation { reading, classification, alerts })
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Validates, authorizes, classifies and stores a submission.
pub fn submit_reading(
    store: &mut dyn WaterQualityStore,
    user: &User,
    submission: &ReadingSubmission,
    options: SubmitOptions,
    now: DateTime<Utc>,
) -> Result<SubmissionOutcome, SubmissionError> {
    let site_id = submission.site_id.as_str();
    let result = submit_inner(store, user, submission, options, now);
    if let Err(err) = &result {
        log_rejection(Some(site_id), "submit reading", err);
    }
    result
}

fn submit_inner(
    store: &mut dyn WaterQualityStore,
    user: &User,
    submission: &ReadingSubmission,
    options: SubmitOptions,
    now: DateTime<Utc>,
) -> Result<SubmissionOutcome, SubmissionError> {
    let site = store
        .site(&submission.site_id)?
        .ok_or_else(|| SubmissionError::UnknownSite(submission.site_id.clone()))?;
    let evaluation = evaluate_submission(&site, submission, &user.id, options, now)?;

    if !can_submit_readings(user, &site.id) {
        return Err(SubmissionError::Forbidden {
            user: user.id.clone(),
            action: "submit readings",
            site: site.id.clone(),
        });
    }

    let Evaluation { reading, alerts, .. } = evaluation;
    store.insert_reading(&reading, &alerts)?;
    log_submission(&site.id, &reading.id, reading.status, alerts.len());

    record_activity(
        store,
        &site.id,
        ActivityEntry {
            id: new_id(),
            user_id: user.id.clone(),
            action: ActivityAction::Create,
            resource_type: "water_quality_data".to_string(),
            resource_id: Some(reading.id.clone()),
            details: format!("Submitted water quality data for site {}", site.id),
            created_at: now,
        },
    );

    Ok(SubmissionOutcome {
        reading_id: reading.id,
        status: reading.status,
        alerts,
    })
}

/// Acknowledges an alert on behalf of `user`.
pub fn acknowledge_alert(
    store: &mut dyn WaterQualityStore,
    user: &User,
    alert_id: &str,
    now: DateTime<Utc>,
) -> Result<Alert, SubmissionError> {
    let result = acknowledge_inner(store, user, alert_id, now);
    if let Err(err) = &result {
        log_rejection(None, "acknowledge alert", err);
    }
    result
}

fn acknowledge_inner(
    store: &mut dyn WaterQualityStore,
    user: &User,
    alert_id: &str,
    now: DateTime<Utc>,
) -> Result<Alert, SubmissionError> {
    let record = store.alert(alert_id)?.ok_or_else(|| SubmissionError::NotFound {
        entity: "alert",
        id: alert_id.to_string(),
    })?;

    if !can_acknowledge(user, &record.site_id) {
        return Err(SubmissionError::Forbidden {
            user: user.id.clone(),
            action: "acknowledge alerts",
            site: record.site_id,
        });
    }
    if record.alert.acknowledged {
        return Err(SubmissionError::AlreadyAcknowledged { id: alert_id.to_string() });
    }

    // The store re-checks the flag, so a concurrent acknowledgment still
    // surfaces as AlreadyAcknowledged.
    let alert = store.acknowledge_alert(alert_id, &user.id, now)?;
    log_acknowledgment(&record.site_id, alert_id, &user.id);

    record_activity(
        store,
        &record.site_id,
        ActivityEntry {
            id: new_id(),
            user_id: user.id.clone(),
            action: ActivityAction::Acknowledge,
            resource_type: "alerts".to_string(),
            resource_id: Some(alert_id.to_string()),
            details: format!("Acknowledged {} alert for {}", alert.severity(), alert.parameter),
            created_at: now,
        },
    );
    Ok(alert)
}

/// Lists readings from the sites `user` may view.
pub fn list_readings(
    store: &mut dyn WaterQualityStore,
    user: &User,
    filter: &ReadingFilter,
    page: PageRequest,
) -> Result<Page<Reading>, SubmissionError> {
    let mut scoped = filter.clone();
    scoped.site_ids = scope_sites(user, filter.site_ids.as_deref(), "view readings")?;
    Ok(store.readings(&scoped, page)?)
}

/// Lists alerts raised at the sites `user` may view.
pub fn list_alerts(
    store: &mut dyn WaterQualityStore,
    user: &User,
    filter: &AlertFilter,
    page: PageRequest,
) -> Result<Page<AlertRecord>, SubmissionError> {
    let mut scoped = filter.clone();
    scoped.site_ids = scope_sites(user, filter.site_ids.as_deref(), "view alerts")?;
    Ok(store.alerts(&scoped, page)?)
}

/// Narrows a requested site list to what `user` may see. An explicit
/// request for a site outside their access is refused rather than
/// silently dropped.
fn scope_sites(
    user: &User,
    requested: Option<&[String]>,
    action: &'static str,
) -> Result<Option<Vec<String>>, SubmissionError> {
    match requested {
        Some(ids) => {
            if let Some(denied) = ids.iter().find(|id| !can_view_site(user, id)) {
                return Err(SubmissionError::Forbidden {
                    user: user.id.clone(),
                    action,
                    site: denied.clone(),
                });
            }
            Ok(Some(ids.to_vec()))
        }
        None => Ok(visible_sites(user)),
    }
}

/// Activity logging never fails the action it records.
fn record_activity(store: &mut dyn WaterQualityStore, site_id: &str, entry: ActivityEntry) {
    if let Err(err) = store.record_activity(&entry) {
        log_store_failure(site_id, "record activity", &err);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::model::{PARAM_CONDUCTIVITY, PARAM_PH};
    use crate::sites::default_sites;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn user(id: &str, role: Role, sites: &[&str]) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
            email: String::new(),
            role,
            site_access: sites.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn agent() -> User {
        user("user-2", Role::SiteAgent, &["site-1"])
    }

    fn submission(site: &str, values: &[(&str, Option<f64>)]) -> ReadingSubmission {
        ReadingSubmission {
            site_id: site.to_string(),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Default::default()
        }
    }

    fn complete_values() -> Vec<(&'static str, Option<f64>)> {
        vec![
            ("pH", Some(7.2)),
            ("temperature", Some(24.0)),
            ("dissolved_oxygen", Some(6.8)),
            ("conductivity", Some(640.0)),
            ("turbidity", Some(3.1)),
        ]
    }

    #[test]
    fn test_normal_submission_stores_reading_without_alerts() {
        let mut store = MemoryStore::new(default_sites());
        let outcome = submit_reading(
            &mut store,
            &agent(),
            &submission("site-1", &complete_values()),
            SubmitOptions::default(),
            fixed_now(),
        )
        .expect("submission should succeed");

        assert_eq!(outcome.status, Status::Normal);
        assert!(outcome.alerts.is_empty());

        let stored = store.readings(&ReadingFilter::default(), PageRequest::default()).unwrap();
        assert_eq!(stored.items[0].id, outcome.reading_id);
        assert_eq!(stored.items[0].collected_by, "user-2");
        assert_eq!(stored.items[0].location, default_sites()[0].location(), "location defaults to the site");
        assert_eq!(store.activity().len(), 1);
        assert_eq!(store.activity()[0].action, ActivityAction::Create);
    }

    #[test]
    fn test_breaching_submission_raises_alerts() {
        let mut store = MemoryStore::new(default_sites());
        let outcome = submit_reading(
            &mut store,
            &agent(),
            &submission("site-1", &[("ph", Some(9.5)), (PARAM_CONDUCTIVITY, Some(850.0))]),
            SubmitOptions::default(),
            fixed_now(),
        )
        .expect("submission should succeed");

        assert_eq!(outcome.status, Status::Critical);
        assert_eq!(outcome.alerts.len(), 2);
        let ph = outcome.alerts.iter().find(|a| a.parameter == PARAM_PH).expect("pH alert");
        assert_eq!(ph.level, Status::Critical);
        assert!(outcome.alerts.iter().all(|a| a.reading_id == outcome.reading_id));

        let stored = store.alerts(&AlertFilter::default(), PageRequest::default()).unwrap();
        assert_eq!(stored.total, 2);
        assert!(stored.items.iter().all(|r| r.site_id == "site-1"));
    }

    #[test]
    fn test_column_names_are_accepted_as_keys() {
        let site = &default_sites()[0];
        let values = validate_values(
            site,
            &[("ph".to_string(), Some(7.0))].into_iter().collect(),
            SubmitOptions::default(),
        )
        .unwrap();
        assert_eq!(values.get(PARAM_PH), Some(&7.0));
    }

    #[test]
    fn test_same_parameter_under_both_spellings_rejected() {
        let mut store = MemoryStore::new(default_sites());
        let result = submit_reading(
            &mut store,
            &agent(),
            &submission("site-1", &[("pH", Some(7.0)), ("ph", Some(9.5))]),
            SubmitOptions::default(),
            fixed_now(),
        );
        assert!(matches!(result, Err(SubmissionError::DuplicateParameter(p)) if p == PARAM_PH));
        assert!(store.readings(&ReadingFilter::default(), PageRequest::default()).unwrap().items.is_empty());
    }

    #[test]
    fn test_column_spelled_site_threshold_still_raises_alert() {
        let registry = crate::sites::parse_registry(
            r#"
            [[site]]
            id = "site-1"
            name = "A"
            latitude = 0.0
            longitude = 0.0

            [site.thresholds.ph]
            min = 6.5
            max = 8.5
            "#,
        )
        .unwrap();
        let admin = user("user-1", Role::Admin, &[]);

        let mut store = MemoryStore::new(registry.sites.clone());
        let outcome = submit_reading(
            &mut store,
            &admin,
            &submission("site-1", &[("pH", Some(9.5))]),
            SubmitOptions::default(),
            fixed_now(),
        )
        .unwrap();
        assert_eq!(outcome.status, Status::Critical);
        assert_eq!(outcome.alerts.len(), 1);

        let strict = submit_reading(
            &mut store,
            &admin,
            &submission("site-1", &[("pH", Some(7.0))]),
            SubmitOptions { require_complete: true },
            fixed_now(),
        );
        assert!(strict.is_ok(), "a complete reading must pass the completeness check: {strict:?}");
    }

    #[test]
    fn test_null_values_are_not_measured() {
        let site = &default_sites()[0];
        let values = validate_values(
            site,
            &[("turbidity".to_string(), None)].into_iter().collect(),
            SubmitOptions::default(),
        )
        .unwrap();
        assert!(values.is_empty(), "null must not be coerced to zero");
    }

    #[test]
    fn test_require_complete_rejects_missing_parameter() {
        let mut values = complete_values();
        values.retain(|(k, _)| *k != "turbidity");
        values.push(("turbidity", None));

        let mut store = MemoryStore::new(default_sites());
        let result = submit_reading(
            &mut store,
            &agent(),
            &submission("site-1", &values),
            SubmitOptions { require_complete: true },
            fixed_now(),
        );
        assert!(matches!(result, Err(SubmissionError::MissingParameter(p)) if p == "turbidity"));
        assert!(store.readings(&ReadingFilter::default(), PageRequest::default()).unwrap().items.is_empty());
    }

    #[test]
    fn test_unknown_parameter_and_non_finite_value_rejected() {
        let mut store = MemoryStore::new(default_sites());
        let unknown = submit_reading(
            &mut store,
            &agent(),
            &submission("site-1", &[("radon", Some(1.0))]),
            SubmitOptions::default(),
            fixed_now(),
        );
        assert!(matches!(unknown, Err(SubmissionError::UnknownParameter(p)) if p == "radon"));

        let nan = submit_reading(
            &mut store,
            &agent(),
            &submission("site-1", &[("pH", Some(f64::NAN))]),
            SubmitOptions::default(),
            fixed_now(),
        );
        assert!(matches!(nan, Err(SubmissionError::NonFiniteValue(_))));
    }

    #[test]
    fn test_unknown_site_rejected() {
        let mut store = MemoryStore::new(default_sites());
        let result = submit_reading(
            &mut store,
            &agent(),
            &submission("site-404", &complete_values()),
            SubmitOptions::default(),
            fixed_now(),
        );
        assert!(matches!(result, Err(SubmissionError::UnknownSite(_))));
    }

    #[test]
    fn test_agent_cannot_submit_for_other_site() {
        let mut store = MemoryStore::new(default_sites());
        let result = submit_reading(
            &mut store,
            &agent(),
            &submission("site-2", &complete_values()),
            SubmitOptions::default(),
            fixed_now(),
        );
        assert!(matches!(result, Err(SubmissionError::Forbidden { .. })));

        let director = user("user-4", Role::Director, &[]);
        let result = submit_reading(
            &mut store,
            &director,
            &submission("site-1", &complete_values()),
            SubmitOptions::default(),
            fixed_now(),
        );
        assert!(
            matches!(result, Err(SubmissionError::Forbidden { .. })),
            "directors see every site but do not enter data"
        );
    }

    #[test]
    fn test_acknowledge_flow() {
        let mut store = MemoryStore::new(default_sites());
        let outcome = submit_reading(
            &mut store,
            &agent(),
            &submission("site-1", &[("pH", Some(8.6))]),
            SubmitOptions::default(),
            fixed_now(),
        )
        .unwrap();
        let alert_id = outcome.alerts[0].id.clone();

        let outsider = user("user-6", Role::Professor, &["site-2"]);
        assert!(matches!(
            acknowledge_alert(&mut store, &outsider, &alert_id, fixed_now()),
            Err(SubmissionError::Forbidden { .. })
        ));

        let acked = acknowledge_alert(&mut store, &agent(), &alert_id, fixed_now()).unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("user-2"));

        let again = acknowledge_alert(&mut store, &agent(), &alert_id, fixed_now());
        assert!(matches!(again, Err(SubmissionError::AlreadyAcknowledged { .. })));

        let missing = acknowledge_alert(&mut store, &agent(), "a-404", fixed_now());
        assert!(matches!(missing, Err(SubmissionError::NotFound { .. })));

        assert_eq!(store.activity().len(), 2, "submit and one acknowledgment are logged");
    }

    #[test]
    fn test_listing_is_scoped_to_user_sites() {
        let mut store = MemoryStore::new(default_sites());
        let admin = user("user-1", Role::Admin, &[]);
        for site in ["site-1", "site-2"] {
            submit_reading(
                &mut store,
                &admin,
                &submission(site, &[("pH", Some(9.5))]),
                SubmitOptions::default(),
                fixed_now(),
            )
            .unwrap();
        }

        let page = list_readings(&mut store, &agent(), &ReadingFilter::default(), PageRequest::default()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].site_id, "site-1");

        let alerts = list_alerts(&mut store, &admin, &AlertFilter::default(), PageRequest::default()).unwrap();
        assert_eq!(alerts.total, 2);

        let other_site = AlertFilter { site_ids: Some(vec!["site-2".to_string()]), ..Default::default() };
        assert!(matches!(
            list_alerts(&mut store, &agent(), &other_site, PageRequest::default()),
            Err(SubmissionError::Forbidden { .. })
        ));
    }
}
