use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};

use eau_vigilance::access::User;
use eau_vigilance::analysis::{dashboard_summary, parameter_series, parameter_statistics};
use eau_vigilance::config::{Backend, Config, ConfigError};
use eau_vigilance::ingest::{
    ReadingSubmission, SubmissionError, acknowledge_alert, evaluate_submission, list_alerts, submit_reading,
};
use eau_vigilance::logging::{Component, LoggingError, init_logger};
use eau_vigilance::sites::SiteRegistry;
use eau_vigilance::store::{AlertFilter, MAX_PAGE_LIMIT, PageRequest, ReadingFilter, StoreError};

#[derive(Parser)]
#[command(name = "eau_vigilance")]
#[command(about = "Water-quality threshold monitoring for mining sites")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $EAU_VIGILANCE_CONFIG or eau_vigilance.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a reading file without storing it
    Evaluate {
        /// JSON reading submission
        reading: PathBuf,
    },

    /// Submit a reading file to the configured store
    Submit {
        reading: PathBuf,

        /// Id of the submitting user in the site registry
        #[arg(long)]
        user: String,
    },

    /// List alerts, newest first
    Alerts {
        #[arg(long)]
        site: Option<String>,

        /// Only alerts nobody has acknowledged yet
        #[arg(long)]
        unacknowledged: bool,

        /// Restrict the listing to what this user may see
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Acknowledge an alert
    Acknowledge {
        alert_id: String,

        #[arg(long)]
        user: String,
    },

    /// Dashboard counts, optionally with statistics for one parameter
    Summary {
        #[arg(long)]
        parameter: Option<String>,

        #[arg(long)]
        site: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid reading file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("unknown site '{0}'")]
    UnknownSite(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logger(&config.logging.level, config.logging.file.as_deref(), config.logging.timestamps) {
        eprintln!("✗ {e}");
        return ExitCode::FAILURE;
    }

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(component = Component::System.as_str(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => {
            dotenv::dotenv().ok();
            let mut config = Config::load(path)?;
            config.apply_overrides(|name| std::env::var(name).ok());
            Ok(config)
        }
        None => Config::from_env(),
    }
}

fn run(command: Commands, config: &Config) -> Result<(), CliError> {
    let registry = config.load_sites()?;
    info!(
        component = Component::Config.as_str(),
        sites = registry.sites.len(),
        users = registry.users.len(),
        "site registry loaded"
    );

    match command {
        Commands::Evaluate { reading } => {
            let submission = read_submission(&reading)?;
            let site = registry
                .find_site(&submission.site_id)
                .ok_or_else(|| CliError::UnknownSite(submission.site_id.clone()))?;
            let evaluation = evaluate_submission(site, &submission, "-", config.submit_options(), Utc::now())?;
            print_json(&json!({
                "status": evaluation.classification.overall,
                "parameters": evaluation.classification.per_parameter,
                "alerts": evaluation.alerts,
            }))
        }

        Commands::Submit { reading, user } => {
            let user = find_user(&registry, &user)?;
            let submission = read_submission(&reading)?;
            if config.storage.backend == Backend::Memory {
                warn!(component = Component::Store.as_str(), "memory backend: the reading is not kept after exit");
            }
            let mut store = config.open_store(&registry)?;
            let outcome = submit_reading(store.as_mut(), user, &submission, config.submit_options(), Utc::now())?;
            print_json(&outcome)
        }

        Commands::Alerts { site, unacknowledged, user, limit, offset } => {
            let filter = AlertFilter {
                site_ids: site.map(|s| vec![s]),
                acknowledged: unacknowledged.then_some(false),
                ..Default::default()
            };
            let page = PageRequest::new(limit, offset);
            let mut store = config.open_store(&registry)?;
            let alerts = match user {
                Some(id) => list_alerts(store.as_mut(), find_user(&registry, &id)?, &filter, page)?,
                None => store.alerts(&filter, page)?,
            };
            print_json(&alerts)
        }

        Commands::Acknowledge { alert_id, user } => {
            let user = find_user(&registry, &user)?;
            let mut store = config.open_store(&registry)?;
            let alert = acknowledge_alert(store.as_mut(), user, &alert_id, Utc::now())?;
            print_json(&alert)
        }

        Commands::Summary { parameter, site } => {
            let mut store = config.open_store(&registry)?;
            let full = PageRequest::new(MAX_PAGE_LIMIT, 0);
            let sites = store.sites()?;
            let readings = store.readings(&ReadingFilter::default(), full)?;
            let alerts = store.alerts(&AlertFilter::default(), full)?;
            if readings.total > readings.items.len() {
                warn!(
                    component = Component::Store.as_str(),
                    "summary covers the latest {} of {} readings",
                    readings.items.len(),
                    readings.total
                );
            }

            let summary = dashboard_summary(&sites, &readings.items, &alerts.items);
            let statistics = parameter.as_deref().map(|p| {
                let series = parameter_series(&readings.items, site.as_deref(), p);
                json!({ "parameter": p, "site": site, "statistics": parameter_statistics(&series) })
            });
            print_json(&json!({ "summary": summary, "parameter": statistics }))
        }
    }
}

fn find_user<'a>(registry: &'a SiteRegistry, user_id: &str) -> Result<&'a User, CliError> {
    registry
        .find_user(user_id)
        .ok_or_else(|| CliError::UnknownUser(user_id.to_string()))
}

fn read_submission(path: &Path) -> Result<ReadingSubmission, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
