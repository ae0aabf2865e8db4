/// Structured logging for the water-quality monitoring service
///
/// Events carry the component that emitted them plus site, reading and
/// alert identifiers as `tracing` fields. Output goes to the console and,
/// when configured, is appended to a log file for unattended runs.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as fmt_layer};

use crate::ingest::SubmissionError;
use crate::model::Status;
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(LoggingError::UnknownLevel(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Ingest,
    Alerts,
    Store,
    Config,
    System,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Ingest => "INGEST",
            Component::Alerts => "ALERTS",
            Component::Store => "STORE",
            Component::Config => "CONFIG",
            Component::System => "SYS",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - a caller mistake the store correctly refused
    Expected,
    /// Unexpected failure - backend unreachable, misconfigured or returning bad data
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
    #[error("failed to open log file {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `filter` is either a bare level (`"info"`) or a full `EnvFilter`
/// directive string (`"warn,eau_vigilance=debug"`). With
/// `console_timestamps` off the console shows only level and message.
pub fn init_logger(
    filter: &str,
    log_file: Option<&Path>,
    console_timestamps: bool,
) -> Result<(), LoggingError> {
    let directive = match filter.parse::<LogLevel>() {
        Ok(level) => level.as_directive().to_string(),
        Err(_) => filter.to_string(),
    };
    let filter = EnvFilter::try_new(directive)?;

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.display().to_string(),
                    source,
                })?;
            Some(fmt_layer::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if console_timestamps {
        registry
            .with(fmt_layer::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(
                fmt_layer::layer()
                    .without_time()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Submission Logging
// ---------------------------------------------------------------------------

/// Logs an accepted reading at a level matching its overall status.
pub fn log_submission(site_id: &str, reading_id: &str, status: Status, alert_count: usize) {
    let component = Component::Ingest.as_str();
    match status {
        Status::Normal => info!(component, site = site_id, reading = reading_id, "reading stored, status normal"),
        Status::Warning => warn!(
            component,
            site = site_id,
            reading = reading_id,
            alerts = alert_count,
            "reading stored, status warning"
        ),
        Status::Critical => error!(
            component,
            site = site_id,
            reading = reading_id,
            alerts = alert_count,
            "reading stored, status critical"
        ),
    }
}

/// Logs a rejected submission or acknowledgment.
pub fn log_rejection(site_id: Option<&str>, operation: &str, err: &SubmissionError) {
    let component = Component::Ingest.as_str();
    match err {
        SubmissionError::Store(store_err) => {
            log_store_failure(site_id.unwrap_or("-"), operation, store_err);
        }
        _ => warn!(component, site = site_id.unwrap_or("-"), "{} rejected: {}", operation, err),
    }
}

pub fn log_acknowledgment(site_id: &str, alert_id: &str, user_id: &str) {
    info!(
        component = Component::Alerts.as_str(),
        site = site_id,
        alert = alert_id,
        user = user_id,
        "alert acknowledged"
    );
}

// ---------------------------------------------------------------------------
// Store Failure Logging
// ---------------------------------------------------------------------------

/// Classify a store failure by its error variant
pub fn classify_store_failure(err: &StoreError) -> FailureType {
    match err {
        StoreError::NotFound { .. } | StoreError::AlreadyAcknowledged { .. } => FailureType::Expected,
        StoreError::Postgres(_) | StoreError::Http(_) => FailureType::Unexpected,
        // 4xx from PostgREST usually means a schema or permission mismatch;
        // 5xx is the service itself.
        StoreError::HttpStatus { status, .. } if *status >= 500 => FailureType::Unexpected,
        StoreError::HttpStatus { status, .. } if *status == 401 || *status == 403 => FailureType::Unexpected,
        StoreError::Json(_) | StoreError::Model(_) => FailureType::Unexpected,
        StoreError::HttpStatus { .. } | StoreError::Other(_) => FailureType::Unknown,
    }
}

/// Log a store failure with automatic classification
pub fn log_store_failure(site_id: &str, operation: &str, err: &StoreError) {
    let failure_type = classify_store_failure(err);
    let component = Component::Store.as_str();

    match failure_type {
        FailureType::Expected => debug!(component, site = site_id, "{} failed [{}]: {}", operation, failure_type, err),
        FailureType::Unexpected => error!(component, site = site_id, "{} failed [{}]: {}", operation, failure_type, err),
        FailureType::Unknown => warn!(component, site = site_id, "{} failed [{}]: {}", operation, failure_type, err),
    }
}
