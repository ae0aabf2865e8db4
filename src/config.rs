//! Service configuration.
//!
//! Read from a TOML file, then overridden by environment variables (a `.env`
//! file is honored). A missing config file is not an error; every setting
//! has a default and the memory backend needs nothing else.
//!
//! ```toml
//! sites_file = "sites.toml"
//!
//! [storage]
//! backend = "postgres"        # memory | postgres | supabase
//!
//! [logging]
//! level = "info"
//! file = "eau_vigilance.log"
//! timestamps = true
//!
//! [ingest]
//! require_complete = false
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::ingest::SubmitOptions;
use crate::sites::{SiteError, SiteRegistry, load_registry};
use crate::store::pg::REQUIRED_TABLES;
use crate::store::{MemoryStore, PostgresStore, StoreError, SupabaseStore, WaterQualityStore};

pub const CONFIG_PATH_VAR: &str = "EAU_VIGILANCE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "eau_vigilance.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
    Supabase,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,
    pub database_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    pub file: Option<PathBuf>,
    #[serde(default = "default_timestamps")]
    pub timestamps: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_timestamps() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_level(), file: None, timestamps: default_timestamps() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub require_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    /// Site and user registry; the built-in sites are used when unset.
    pub sites_file: Option<PathBuf>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} must be set for the configured storage backend")]
    Missing(&'static str),
    #[error(transparent)]
    Sites(#[from] SiteError),
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Io { path: path.display().to_string(), source }),
        }
    }

    /// Loads `.env`, the config file named by `EAU_VIGILANCE_CONFIG` (or the
    /// default path) and the environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies `DATABASE_URL`, `SUPABASE_URL`, `SUPABASE_KEY` and
    /// `EAU_VIGILANCE_LOG` from `lookup`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Some(url) = get("SUPABASE_URL") {
            self.storage.supabase_url = Some(url);
        }
        if let Some(key) = get("SUPABASE_KEY") {
            self.storage.supabase_key = Some(key);
        }
        if let Some(level) = get("EAU_VIGILANCE_LOG") {
            self.logging.level = level;
        }
    }

    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions { require_complete: self.ingest.require_complete }
    }

    pub fn load_sites(&self) -> Result<SiteRegistry, ConfigError> {
        match &self.sites_file {
            Some(path) => Ok(load_registry(path)?),
            None => Ok(SiteRegistry::builtin()),
        }
    }

    /// Opens the configured backend. The memory backend is seeded with the
    /// registry's sites.
    pub fn open_store(&self, registry: &SiteRegistry) -> Result<Box<dyn WaterQualityStore>, ConfigError> {
        let storage = &self.storage;
        match storage.backend {
            Backend::Memory => Ok(Box::new(MemoryStore::new(registry.sites.clone()))),
            Backend::Postgres => {
                let url = storage.database_url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))?;
                Ok(Box::new(PostgresStore::connect_and_verify(url, REQUIRED_TABLES)?))
            }
            Backend::Supabase => {
                let url = storage.supabase_url.as_deref().ok_or(ConfigError::Missing("SUPABASE_URL"))?;
                let key = storage.supabase_key.as_deref().ok_or(ConfigError::Missing("SUPABASE_KEY"))?;
                Ok(Box::new(SupabaseStore::new(url, key)?))
            }
        }
    }
}
