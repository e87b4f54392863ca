use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_DATABASE_URL: &str = "sqlite://ledger.db?mode=rwc";
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "LEDGER";

/// Ledger configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Database connection URL (Postgres or SQLite)
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Total attempts for a unit of work before a conflict is surfaced
    #[serde(default = "default_max_retry_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub max_retry_attempts: u32,

    /// Delay before the first conflict retry (milliseconds)
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Upper bound for a single retry delay (milliseconds)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Multiplier applied to the delay after each conflict
    #[serde(default = "default_retry_backoff_factor")]
    #[validate(custom = "validate_backoff_factor")]
    pub retry_backoff_factor: f64,

    /// How many recent receipts the receipt-number helper inspects
    #[serde(default = "default_receipt_number_scan_limit")]
    #[validate(range(min = 1, max = 10000))]
    pub receipt_number_scan_limit: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: default_db_max_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            auto_migrate: false,
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            max_retry_attempts: default_max_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_backoff_factor: default_retry_backoff_factor(),
            receipt_number_scan_limit: default_receipt_number_scan_limit(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl LedgerConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum LedgerConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_db_max_connections() -> u32 {
    8
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_retry_initial_delay_ms() -> u64 {
    10
}

fn default_retry_max_delay_ms() -> u64 {
    500
}

fn default_retry_backoff_factor() -> f64 {
    2.0
}

fn default_receipt_number_scan_limit() -> u64 {
    50
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_backoff_factor(factor: f64) -> Result<(), ValidationError> {
    if !factor.is_finite() || factor < 1.0 {
        let mut err = ValidationError::new("retry_backoff_factor");
        err.message = Some("retry_backoff_factor must be a finite value >= 1.0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("purchase_ledger={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads configuration from `./config`.
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (LEDGER__*)
pub fn load_config() -> Result<LedgerConfig, LedgerConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] but reads the TOML files from `config_dir`.
pub fn load_config_from(config_dir: &Path) -> Result<LedgerConfig, LedgerConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let defaults = LedgerConfig::default();
    let config = Config::builder()
        .set_default("database_url", defaults.database_url)?
        .set_default("environment", run_env.clone())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let ledger_config: LedgerConfig = config.try_deserialize()?;

    ledger_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        LedgerConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(ledger_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_default(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), content).unwrap();
        dir
    }

    #[test]
    fn defaults_validate() {
        let cfg = LedgerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_retry_attempts, 5);
        assert!(!cfg.is_production());
    }

    #[test]
    fn partial_tables_deserialize_with_defaults() {
        let cfg: LedgerConfig =
            serde_json::from_value(serde_json::json!({ "max_retry_attempts": 3 })).unwrap();

        assert_eq!(cfg.database_url(), DEFAULT_DATABASE_URL);
        assert_eq!(cfg.max_retry_attempts, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = write_default(
            r#"
            database_url = "sqlite::memory:"
            max_retry_attempts = 9
            receipt_number_scan_limit = 20
            log_json = true
            "#,
        );

        let cfg = load_config_from(dir.path()).unwrap();

        assert_eq!(cfg.database_url(), "sqlite::memory:");
        assert_eq!(cfg.max_retry_attempts, 9);
        assert_eq!(cfg.receipt_number_scan_limit, 20);
        assert!(cfg.log_json);
        assert_eq!(cfg.retry_backoff_factor, 2.0);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = write_default(
            r#"
            max_retry_attempts = 0
            retry_backoff_factor = 0.5
            log_level = "loud"
            "#,
        );

        let err = load_config_from(dir.path()).unwrap_err();
        match err {
            LedgerConfigError::Validation(errors) => {
                let fields = errors.field_errors();
                assert!(fields.contains_key("max_retry_attempts"));
                assert!(fields.contains_key("retry_backoff_factor"));
                assert!(fields.contains_key("log_level"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_directory_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config_from(&dir.path().join("absent")).unwrap();
        assert_eq!(cfg.receipt_number_scan_limit, 50);
    }
}
