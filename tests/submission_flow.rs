/// End-to-end tests for the submission and acknowledgment pipeline
///
/// These tests drive the public services against the in-memory store:
/// 1. Site registry loads from the example sites file
/// 2. Readings are classified, stored and alerted on
/// 3. Alerts are acknowledged exactly once
/// 4. Listings and the dashboard only show what a user may see
///
/// No database or network access is needed.
///
/// Run with: cargo test --test submission_flow

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};

use eau_vigilance::access::User;
use eau_vigilance::analysis::{dashboard_summary, parameter_series, parameter_statistics};
use eau_vigilance::ingest::{
    ReadingSubmission, SubmissionError, SubmitOptions, acknowledge_alert, list_alerts, list_readings,
    submit_reading,
};
use eau_vigilance::model::{ActivityAction, AlertSeverity, Status};
use eau_vigilance::sites::{SiteRegistry, load_registry};
use eau_vigilance::store::{AlertFilter, MemoryStore, PageRequest, ReadingFilter, WaterQualityStore};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn example_registry() -> SiteRegistry {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sites.example.toml");
    load_registry(&path).expect("sites.example.toml should load and validate")
}

fn user<'a>(registry: &'a SiteRegistry, id: &str) -> &'a User {
    registry
        .find_user(id)
        .unwrap_or_else(|| panic!("{id} should be in the example registry"))
}

fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
}

fn submission(site: &str, at: DateTime<Utc>, values: &[(&str, f64)]) -> ReadingSubmission {
    ReadingSubmission {
        site_id: site.to_string(),
        timestamp: Some(at),
        values: values
            .iter()
            .map(|(k, v)| (k.to_string(), Some(*v)))
            .collect::<BTreeMap<_, _>>(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_example_registry_matches_builtin_sites() {
    let registry = example_registry();
    let builtin = SiteRegistry::builtin();
    assert_eq!(registry.site_ids(), builtin.site_ids());
    assert_eq!(
        registry.thresholds_for("site-1").and_then(|t| t.get("pH")),
        builtin.thresholds_for("site-1").and_then(|t| t.get("pH")),
    );
    assert!(registry.thresholds_for("site-1").unwrap().contains("mercury"));
}

#[test]
fn test_submit_acknowledge_and_summarize() {
    let registry = example_registry();
    let mut store = MemoryStore::new(registry.sites.clone());
    let agent = user(&registry, "user-2");
    let supervisor = user(&registry, "user-3");

    let calm = submit_reading(
        &mut store,
        agent,
        &submission("site-1", morning(), &[("pH", 7.2), ("conductivity", 640.0)]),
        SubmitOptions::default(),
        morning(),
    )
    .expect("in-range reading should be accepted");
    assert_eq!(calm.status, Status::Normal);
    assert!(calm.alerts.is_empty());

    let later = morning() + Duration::hours(4);
    let storm = submit_reading(
        &mut store,
        agent,
        &submission("site-1", later, &[("pH", 9.5), ("conductivity", 850.0), ("mercury", 1.05)]),
        SubmitOptions::default(),
        later,
    )
    .expect("out-of-range reading should still be accepted");
    assert_eq!(storm.status, Status::Critical);
    assert_eq!(storm.alerts.len(), 3, "one alert per breaching parameter");

    let ph = storm.alerts.iter().find(|a| a.parameter == "pH").unwrap();
    assert_eq!(ph.severity(), AlertSeverity::High);
    assert!(ph.message.contains("9.5") && ph.message.contains("8.5"), "message: {}", ph.message);

    let conductivity = storm.alerts.iter().find(|a| a.parameter == "conductivity").unwrap();
    assert_eq!(conductivity.level, Status::Warning);

    // Supervisor acknowledges the pH alert; a second attempt is refused.
    let acked = acknowledge_alert(&mut store, supervisor, &ph.id, later).expect("first acknowledgment");
    assert_eq!(acked.acknowledged_by.as_deref(), Some("user-3"));
    assert_eq!(acked.acknowledged_at, Some(later));
    assert!(matches!(
        acknowledge_alert(&mut store, agent, &ph.id, later),
        Err(SubmissionError::AlreadyAcknowledged { .. })
    ));

    let open = list_alerts(
        &mut store,
        supervisor,
        &AlertFilter { acknowledged: Some(false), ..Default::default() },
        PageRequest::default(),
    )
    .unwrap();
    assert_eq!(open.total, 2);

    let actions: Vec<ActivityAction> = store.activity().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![ActivityAction::Create, ActivityAction::Create, ActivityAction::Acknowledge]
    );

    let readings = store.readings(&ReadingFilter::default(), PageRequest::default()).unwrap();
    let alerts = store.alerts(&AlertFilter::default(), PageRequest::default()).unwrap();
    let summary = dashboard_summary(&registry.sites, &readings.items, &alerts.items);
    assert_eq!(summary.total_readings, 2);
    assert_eq!(summary.unacknowledged_alerts, 2);
    assert_eq!(summary.sites[0].latest_status, Some(Status::Critical));

    let series = parameter_series(&readings.items, Some("site-1"), "pH");
    let stats = parameter_statistics(&series).expect("two pH points");
    assert_eq!(stats.count, 2);
    assert_eq!(stats.max, 9.5);
}

#[test]
fn test_access_rules_across_roles() {
    let registry = example_registry();
    let mut store = MemoryStore::new(registry.sites.clone());
    let admin = user(&registry, "user-1");
    let agent = user(&registry, "user-2");
    let director = user(&registry, "user-4");

    for site in ["site-1", "site-2"] {
        submit_reading(
            &mut store,
            admin,
            &submission(site, morning(), &[("pH", 8.6)]),
            SubmitOptions::default(),
            morning(),
        )
        .expect("admins may submit for any site");
    }

    let agent_view = list_readings(&mut store, agent, &ReadingFilter::default(), PageRequest::default()).unwrap();
    assert_eq!(agent_view.total, 1, "site agents only see their own site");

    let director_view = list_alerts(&mut store, director, &AlertFilter::default(), PageRequest::default()).unwrap();
    assert_eq!(director_view.total, 2, "directors see every site");

    let site2_alert = director_view.items.iter().find(|r| r.site_id == "site-2").unwrap();
    assert!(matches!(
        acknowledge_alert(&mut store, agent, &site2_alert.alert.id, morning()),
        Err(SubmissionError::Forbidden { .. })
    ));
    acknowledge_alert(&mut store, director, &site2_alert.alert.id, morning())
        .expect("directors may acknowledge alerts at any site");
}

#[test]
fn test_require_complete_enforces_configured_parameters() {
    let registry = example_registry();
    let mut store = MemoryStore::new(registry.sites.clone());
    let agent = user(&registry, "user-2");

    let partial = submission("site-1", morning(), &[("pH", 7.0)]);
    let strict = SubmitOptions { require_complete: true };
    assert!(matches!(
        submit_reading(&mut store, agent, &partial, strict, morning()),
        Err(SubmissionError::MissingParameter(_))
    ));
    assert!(
        submit_reading(&mut store, agent, &partial, SubmitOptions::default(), morning()).is_ok(),
        "partial readings are accepted when completeness is not required"
    );
}

#[test]
fn test_demo_reading_file_parses() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/reading.json");
    let text = std::fs::read_to_string(path).expect("demo reading should exist");
    let submission: ReadingSubmission = serde_json::from_str(&text).expect("demo reading should parse");
    assert_eq!(submission.site_id, "site-1");
    assert_eq!(submission.values.get("mercury"), Some(&None));
}
