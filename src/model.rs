/// Core data types for the Eau Vigilance monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// the parameter catalog, thresholds, readings, statuses and alerts. It holds
/// no I/O and no evaluation logic, only types and their conversions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameter catalog
// ---------------------------------------------------------------------------

/// Acidity (dimensionless).
pub const PARAM_PH: &str = "pH";

/// Water temperature, in degrees Celsius.
pub const PARAM_TEMPERATURE: &str = "temperature";

/// Dissolved oxygen, in mg/L.
pub const PARAM_DISSOLVED_OXYGEN: &str = "dissolved_oxygen";

/// Electrical conductivity, in μS/cm.
pub const PARAM_CONDUCTIVITY: &str = "conductivity";

/// Turbidity, in NTU.
pub const PARAM_TURBIDITY: &str = "turbidity";

/// One measurable water-quality parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameter {
    /// Canonical key used in readings, thresholds and alerts.
    pub key: &'static str,
    /// Column name in the `water_quality_data` table.
    pub column: &'static str,
    /// Human-readable label used in generic alert messages.
    pub label: &'static str,
    pub unit: &'static str,
    /// Decimal places used when a value is displayed.
    pub precision: usize,
}

const fn param(
    key: &'static str,
    column: &'static str,
    label: &'static str,
    unit: &'static str,
    precision: usize,
) -> Parameter {
    Parameter { key, column, label, unit, precision }
}

/// Every numeric parameter collected by the data-entry form, grouped as
/// physico-chemical, biological, heavy metals and other chemicals.
pub static PARAMETER_CATALOG: &[Parameter] = &[
    param(PARAM_PH, "ph", "pH", "", 1),
    param(PARAM_TEMPERATURE, "temperature", "Temperature", "°C", 1),
    param(PARAM_DISSOLVED_OXYGEN, "dissolved_oxygen", "Dissolved oxygen", "mg/L", 1),
    param(PARAM_CONDUCTIVITY, "conductivity", "Conductivity", "μS/cm", 0),
    param(PARAM_TURBIDITY, "turbidity", "Turbidity", "NTU", 1),
    param("salinity", "salinity", "Salinity", "g/L", 2),
    param("nitrates", "nitrates", "Nitrates", "mg/L", 1),
    param("nitrites", "nitrites", "Nitrites", "mg/L", 2),
    param("ammonium", "ammonium", "Ammonium", "mg/L", 2),
    param("phosphates", "phosphates", "Phosphates", "mg/L", 2),
    param("suspended_solids", "suspended_solids", "Suspended solids", "mg/L", 1),
    param("fecal_coliforms", "fecal_coliforms", "Fecal coliforms", "CFU/100mL", 0),
    param("e_coli", "e_coli", "E. coli", "CFU/100mL", 0),
    param("ibgn", "ibgn", "IBGN index", "", 0),
    param("lead", "lead", "Lead", "μg/L", 1),
    param("mercury", "mercury", "Mercury", "μg/L", 2),
    param("arsenic", "arsenic", "Arsenic", "μg/L", 1),
    param("cadmium", "cadmium", "Cadmium", "μg/L", 2),
    param("chromium", "chromium", "Chromium", "μg/L", 1),
    param("copper", "copper", "Copper", "μg/L", 1),
    param("zinc", "zinc", "Zinc", "μg/L", 1),
    param("hydrocarbons", "hydrocarbons", "Hydrocarbons", "mg/L", 2),
    param("organic_solvents", "organic_solvents", "Organic solvents", "mg/L", 2),
    param("pesticides", "pesticides", "Pesticides", "μg/L", 2),
];

/// Looks up a parameter by its canonical key. Keys are case-sensitive.
pub fn find_parameter(key: &str) -> Option<&'static Parameter> {
    PARAMETER_CATALOG.iter().find(|p| p.key == key)
}

/// Maps a parameter key or its storage column (`"ph"`) to the canonical key.
pub fn canonical_key(key: &str) -> Option<&'static str> {
    PARAMETER_CATALOG
        .iter()
        .find(|p| p.key == key || p.column == key)
        .map(|p| p.key)
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Acceptable range for one parameter at one site. Either bound may be
/// absent, in which case that side is unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(default)]
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Threshold {
    pub fn new(parameter: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Threshold { parameter: parameter.to_string(), min, max }
    }

    pub fn range(parameter: &str, min: f64, max: f64) -> Self {
        Self::new(parameter, Some(min), Some(max))
    }

    pub fn at_least(parameter: &str, min: f64) -> Self {
        Self::new(parameter, Some(min), None)
    }

    pub fn at_most(parameter: &str, max: f64) -> Self {
        Self::new(parameter, None, Some(max))
    }

    /// Rejects non-finite bounds and ranges whose min exceeds their max.
    pub fn validate(&self) -> Result<(), ModelError> {
        let finite = self.min.is_none_or(f64::is_finite) && self.max.is_none_or(f64::is_finite);
        let ordered = match (self.min, self.max) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        };
        if finite && ordered {
            Ok(())
        } else {
            Err(ModelError::InvalidThreshold {
                parameter: self.parameter.clone(),
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// All thresholds configured for one site, keyed by parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteThresholds(BTreeMap<String, Threshold>);

impl SiteThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a threshold keyed by its own `parameter` field.
    pub fn insert(&mut self, threshold: Threshold) {
        self.0.insert(threshold.parameter.clone(), threshold);
    }

    pub fn get(&self, parameter: &str) -> Option<&Threshold> {
        self.0.get(parameter)
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.0.contains_key(parameter)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Re-keys every threshold by its canonical catalog key and copies that
    /// key into the threshold's `parameter` field. Thresholds deserialized
    /// from a keyed table (TOML, JSON object) omit the field, and stored rows
    /// may use the column spelling. Unknown keys and two spellings of the
    /// same parameter are rejected.
    pub fn canonicalize(self) -> Result<Self, ModelError> {
        let mut canonical = BTreeMap::new();
        for (key, mut threshold) in self.0 {
            let parameter = canonical_key(&key).ok_or_else(|| ModelError::UnknownParameter(key.clone()))?;
            threshold.parameter = parameter.to_string();
            if canonical.insert(parameter.to_string(), threshold).is_some() {
                return Err(ModelError::DuplicateParameter(parameter.to_string()));
            }
        }
        Ok(SiteThresholds(canonical))
    }
}

impl FromIterator<Threshold> for SiteThresholds {
    fn from_iter<I: IntoIterator<Item = Threshold>>(iter: I) -> Self {
        let mut thresholds = SiteThresholds::new();
        for threshold in iter {
            thresholds.insert(threshold);
        }
        thresholds
    }
}

// ---------------------------------------------------------------------------
// Status vocabularies
// ---------------------------------------------------------------------------

/// Classification of a parameter or a whole reading, ordered by severity:
/// normal < warning < critical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Status::Normal),
            "warning" => Ok(Status::Warning),
            "critical" => Ok(Status::Critical),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Severity vocabulary used on alert records. Alerts carry a [`Status`]
/// internally; this type only exists at the storage and wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl AlertSeverity {
    /// `warning` maps to `medium` and `critical` to `high`. A normal status
    /// never produces an alert, so it has no severity.
    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Normal => None,
            Status::Warning => Some(AlertSeverity::Medium),
            Status::Critical => Some(AlertSeverity::High),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a stored alert severity back into the internal status.
///
/// Older rows were written with the reading vocabulary (`warning`,
/// `critical`) instead of `medium`/`high`; both are accepted. `low` has no
/// status counterpart and is rejected.
pub fn parse_alert_severity(s: &str) -> Result<Status, ModelError> {
    match s {
        "medium" | "warning" => Ok(Status::Warning),
        "high" | "critical" => Ok(Status::Critical),
        other => Err(ModelError::UnknownSeverity(other.to_string())),
    }
}

/// Serde adapter writing an alert's [`Status`] as `medium`/`high`.
pub(crate) mod severity_wire {
    use super::{AlertSeverity, Status, parse_alert_severity};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(status: &Status, serializer: S) -> Result<S::Ok, S::Error> {
        match AlertSeverity::from_status(*status) {
            Some(severity) => serializer.serialize_str(severity.as_str()),
            None => Err(serde::ser::Error::custom("alert with normal status has no severity")),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Status, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_alert_severity(&raw).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// WGS84 coordinates of a sampling point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One water-quality sample. Created once at submission, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: String,
    pub site_id: String,
    pub timestamp: DateTime<Utc>,
    pub collected_by: String,
    pub location: GeoPoint,
    /// Measured values keyed by catalog parameter key.
    pub values: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathogens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Overall status computed against the site's thresholds at submission.
    #[serde(default)]
    pub status: Status,
}

impl Reading {
    pub fn value(&self, parameter: &str) -> Option<f64> {
        self.values.get(parameter).copied()
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// A threshold breach recorded against one parameter of one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub reading_id: String,
    pub parameter: String,
    /// Status of the breaching parameter; never `Normal`.
    #[serde(rename = "severity", with = "severity_wire")]
    pub level: Status,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Severity in the alert vocabulary.
    pub fn severity(&self) -> AlertSeverity {
        AlertSeverity::from_status(self.level).unwrap_or(AlertSeverity::Low)
    }
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityAction {
    Create,
    Acknowledge,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Create => "create",
            ActivityAction::Acknowledge => "acknowledge",
        }
    }
}

/// Audit record of a user action on a stored resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: String,
    pub action: ActivityAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Generates a new record identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while constructing or parsing model values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid threshold for '{parameter}': min={min:?}, max={max:?}")]
    InvalidThreshold {
        parameter: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("unknown alert severity: {0}")]
    UnknownSeverity(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("parameter '{0}' is configured more than once")]
    DuplicateParameter(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
