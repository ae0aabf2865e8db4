/// Mining site registry for the Eau Vigilance monitoring service.
///
/// Defines the monitored mining sites, their location and the per-parameter
/// thresholds readings are classified against, plus the user directory used
/// for access checks. This is the single source of truth for site
/// configuration when the storage backend does not carry its own.
///
/// The registry is loaded from a TOML file:
///
/// ```toml
/// [[site]]
/// id = "site-1"
/// name = "Kédougou Gold Mine"
/// latitude = 12.5503
/// longitude = -12.1726
///
/// [site.thresholds.pH]
/// min = 6.5
/// max = 8.5
///
/// [[user]]
/// id = "user-2"
/// name = "Site Agent"
/// role = "site_agent"
/// site_access = ["site-1"]
/// ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::access::User;
use crate::model::{
    GeoPoint, ModelError, PARAM_CONDUCTIVITY, PARAM_DISSOLVED_OXYGEN, PARAM_PH, PARAM_TEMPERATURE,
    PARAM_TURBIDITY, SiteThresholds, Threshold, find_parameter,
};

// ---------------------------------------------------------------------------
// Site metadata
// ---------------------------------------------------------------------------

/// A monitored mining location with its own threshold configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningSite {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_active")]
    pub active_monitoring: bool,
    #[serde(default)]
    pub thresholds: SiteThresholds,
}

fn default_active() -> bool {
    true
}

impl MiningSite {
    pub fn location(&self) -> GeoPoint {
        GeoPoint { latitude: self.latitude, longitude: self.longitude }
    }
}

/// Errors from loading or validating a site registry.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("failed to read site registry {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse site registry: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate site id '{0}' in registry")]
    DuplicateSite(String),
    #[error("duplicate user id '{0}' in registry")]
    DuplicateUser(String),
    #[error("site '{site}': {source}")]
    InvalidThreshold { site: String, source: ModelError },
    #[error("user '{user}' has access to unknown site '{site}'")]
    UnknownSiteAccess { user: String, site: String },
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteRegistry {
    #[serde(default, rename = "site")]
    pub sites: Vec<MiningSite>,
    #[serde(default, rename = "user")]
    pub users: Vec<User>,
}

impl SiteRegistry {
    /// The three monitored sites with the standard regulatory thresholds and
    /// no users.
    pub fn builtin() -> Self {
        SiteRegistry { sites: default_sites(), users: Vec::new() }
    }

    pub fn find_site(&self, site_id: &str) -> Option<&MiningSite> {
        find_site(&self.sites, site_id)
    }

    pub fn thresholds_for(&self, site_id: &str) -> Option<&SiteThresholds> {
        self.find_site(site_id).map(|s| &s.thresholds)
    }

    pub fn find_user(&self, user_id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    pub fn site_ids(&self) -> Vec<&str> {
        self.sites.iter().map(|s| s.id.as_str()).collect()
    }

    /// Checks ids are unique, thresholds name catalog parameters and are
    /// well-formed, and every user's site access names a known site.
    pub fn validate(&self) -> Result<(), SiteError> {
        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(site.id.as_str()) {
                return Err(SiteError::DuplicateSite(site.id.clone()));
            }
            for threshold in site.thresholds.iter() {
                let invalid = |source| SiteError::InvalidThreshold { site: site.id.clone(), source };
                if find_parameter(&threshold.parameter).is_none() {
                    return Err(invalid(ModelError::UnknownParameter(threshold.parameter.clone())));
                }
                threshold.validate().map_err(invalid)?;
            }
        }

        let mut seen_users = HashSet::new();
        for user in &self.users {
            if !seen_users.insert(user.id.as_str()) {
                return Err(SiteError::DuplicateUser(user.id.clone()));
            }
            if let Some(unknown) = user.site_access.iter().find(|s| !seen.contains(s.as_str())) {
                return Err(SiteError::UnknownSiteAccess {
                    user: user.id.clone(),
                    site: unknown.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Parses and validates a registry from TOML text.
pub fn parse_registry(text: &str) -> Result<SiteRegistry, SiteError> {
    let mut registry: SiteRegistry = toml::from_str(text)?;
    for site in &mut registry.sites {
        site.thresholds = std::mem::take(&mut site.thresholds)
            .canonicalize()
            .map_err(|source| SiteError::InvalidThreshold { site: site.id.clone(), source })?;
    }
    registry.validate()?;
    Ok(registry)
}

/// Loads and validates a registry file.
pub fn load_registry(path: impl AsRef<Path>) -> Result<SiteRegistry, SiteError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| SiteError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_registry(&text)
}

/// Looks up a site by id. Returns `None` if not found.
pub fn find_site<'a>(sites: &'a [MiningSite], site_id: &str) -> Option<&'a MiningSite> {
    sites.iter().find(|s| s.id == site_id)
}

/// Thresholds applied at every site unless configured otherwise:
/// pH 6.5–8.5, temperature 10–30 °C, dissolved oxygen ≥ 5 mg/L,
/// conductivity ≤ 800 μS/cm, turbidity ≤ 5 NTU.
pub fn standard_thresholds() -> SiteThresholds {
    [
        Threshold::range(PARAM_PH, 6.5, 8.5),
        Threshold::range(PARAM_TEMPERATURE, 10.0, 30.0),
        Threshold::at_least(PARAM_DISSOLVED_OXYGEN, 5.0),
        Threshold::at_most(PARAM_CONDUCTIVITY, 800.0),
        Threshold::at_most(PARAM_TURBIDITY, 5.0),
    ]
    .into_iter()
    .collect()
}

/// The monitored mining sites in the Kédougou and Tambacounda regions.
pub fn default_sites() -> Vec<MiningSite> {
    vec![
        MiningSite {
            id: "site-1".to_string(),
            name: "Kédougou Gold Mine".to_string(),
            description: "Main gold mining operation in Kédougou region".to_string(),
            latitude: 12.5503,
            longitude: -12.1726,
            active_monitoring: true,
            thresholds: standard_thresholds(),
        },
        MiningSite {
            id: "site-2".to_string(),
            name: "Tambacounda Mine".to_string(),
            description: "Secondary mining site with mixed ore extraction".to_string(),
            latitude: 13.7702,
            longitude: -13.6672,
            active_monitoring: true,
            thresholds: standard_thresholds(),
        },
        MiningSite {
            id: "site-3".to_string(),
            name: "Saraya Extraction Site".to_string(),
            description: "Newer extraction operation focusing on sustainable practices".to_string(),
            latitude: 12.8421,
            longitude: -11.7864,
            active_monitoring: false,
            thresholds: standard_thresholds(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;

    const SAMPLE: &str = r#"
        [[site]]
        id = "site-9"
        name = "Sabodala Pit"
        latitude = 13.18
        longitude = -12.11

        [site.thresholds.pH]
        min = 6.0
        max = 9.0

        [site.thresholds.conductivity]
        max = 1200

        [[user]]
        id = "user-9"
        name = "Field Agent"
        role = "site_agent"
        site_access = ["site-9"]
    "#;

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = SiteRegistry::builtin();
        registry.validate().expect("built-in registry should validate");
        assert_eq!(registry.site_ids(), vec!["site-1", "site-2", "site-3"]);
    }

    #[test]
    fn test_builtin_sites_carry_standard_thresholds() {
        let registry = SiteRegistry::builtin();
        let thresholds = registry.thresholds_for("site-1").expect("site-1 should exist");
        assert_eq!(thresholds.get(PARAM_PH), Some(&Threshold::range(PARAM_PH, 6.5, 8.5)));
        assert_eq!(thresholds.get(PARAM_CONDUCTIVITY).and_then(|t| t.max), Some(800.0));
        assert_eq!(thresholds.get(PARAM_DISSOLVED_OXYGEN).and_then(|t| t.max), None);
    }

    #[test]
    fn test_find_site_returns_none_for_unknown_id() {
        assert!(SiteRegistry::builtin().find_site("site-404").is_none());
    }

    #[test]
    fn test_parse_registry_from_toml() {
        let registry = parse_registry(SAMPLE).expect("sample registry should parse");
        let site = registry.find_site("site-9").expect("site-9 should be present");
        assert!(site.active_monitoring, "active_monitoring defaults to true");
        assert_eq!(site.thresholds.len(), 2);
        assert_eq!(
            site.thresholds.get("conductivity"),
            Some(&Threshold::at_most("conductivity", 1200.0)),
            "parameter names come from the table keys"
        );

        let user = registry.find_user("user-9").expect("user-9 should be present");
        assert_eq!(user.role, Role::SiteAgent);
    }

    #[test]
    fn test_duplicate_site_ids_rejected() {
        let text = r#"
            [[site]]
            id = "site-1"
            name = "A"
            latitude = 0.0
            longitude = 0.0

            [[site]]
            id = "site-1"
            name = "B"
            latitude = 0.0
            longitude = 0.0
        "#;
        assert!(matches!(parse_registry(text), Err(SiteError::DuplicateSite(id)) if id == "site-1"));
    }

    #[test]
    fn test_inverted_threshold_rejected() {
        let text = r#"
            [[site]]
            id = "site-1"
            name = "A"
            latitude = 0.0
            longitude = 0.0

            [site.thresholds.temperature]
            min = 30
            max = 10
        "#;
        assert!(matches!(parse_registry(text), Err(SiteError::InvalidThreshold { .. })));
    }

    #[test]
    fn test_column_spelled_threshold_is_evaluated_as_canonical_parameter() {
        let text = r#"
            [[site]]
            id = "site-1"
            name = "A"
            latitude = 0.0
            longitude = 0.0

            [site.thresholds.ph]
            min = 6.5
            max = 8.5
        "#;
        let registry = parse_registry(text).expect("column spelling should be accepted");
        let thresholds = registry.thresholds_for("site-1").unwrap();
        assert_eq!(thresholds.get(PARAM_PH), Some(&Threshold::range(PARAM_PH, 6.5, 8.5)));
        assert!(!thresholds.contains("ph"));
    }

    #[test]
    fn test_unknown_or_duplicate_threshold_parameter_rejected() {
        let unknown = r#"
            [[site]]
            id = "site-1"
            name = "A"
            latitude = 0.0
            longitude = 0.0

            [site.thresholds.radon]
            max = 1
        "#;
        assert!(matches!(
            parse_registry(unknown),
            Err(SiteError::InvalidThreshold { source: ModelError::UnknownParameter(p), .. }) if p == "radon"
        ));

        let duplicate = r#"
            [[site]]
            id = "site-1"
            name = "A"
            latitude = 0.0
            longitude = 0.0

            [site.thresholds.ph]
            max = 9
            [site.thresholds.pH]
            max = 8.5
        "#;
        assert!(matches!(
            parse_registry(duplicate),
            Err(SiteError::InvalidThreshold { source: ModelError::DuplicateParameter(_), .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_catalog_threshold() {
        let mut registry = SiteRegistry::builtin();
        registry.sites[0].thresholds.insert(Threshold::at_most("ph", 9.0));
        assert!(matches!(registry.validate(), Err(SiteError::InvalidThreshold { .. })));
    }

    #[test]
    fn test_user_with_unknown_site_rejected() {
        let text = r#"
            [[user]]
            id = "user-1"
            name = "Admin"
            role = "admin"
            site_access = ["site-77"]
        "#;
        assert!(matches!(parse_registry(text), Err(SiteError::UnknownSiteAccess { .. })));
    }

    #[test]
    fn test_load_registry_reports_missing_file() {
        let result = load_registry("/nonexistent/sites.toml");
        assert!(matches!(result, Err(SiteError::Io { .. })));
    }
}
