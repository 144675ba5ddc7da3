use chrono::{FixedOffset, Offset, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
/// Europe/Istanbul, the deployment the ledger was first run for.
const DEFAULT_BUSINESS_UTC_OFFSET_MINUTES: i32 = 180;
const DEFAULT_LEDGER_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LEDGER_MAX_CONFLICT_RETRIES: u32 = 3;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins; permissive when unset
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Default page size for paginated API responses
    #[serde(default = "default_api_page_size")]
    #[validate(range(min = 1))]
    pub api_default_page_size: u32,

    /// Maximum page size allowed for paginated API responses
    #[serde(default = "default_api_max_page_size")]
    #[validate(range(min = 1, max = 1000))]
    pub api_max_page_size: u32,

    /// Offset of the business timezone from UTC, in minutes. Used to stamp
    /// movements without an explicit date and to interpret date filters.
    #[serde(default = "default_business_utc_offset_minutes")]
    pub business_utc_offset_minutes: i32,

    /// Upper bound on waiting for per-balance locks before giving up with a
    /// retryable conflict
    #[serde(default = "default_ledger_lock_timeout_ms")]
    pub ledger_lock_timeout_ms: u64,

    /// How many times a conflicting ledger operation is replayed
    #[serde(default = "default_ledger_max_conflict_retries")]
    #[validate(range(max = 20))]
    pub ledger_max_conflict_retries: u32,
}

/// Engine tuning derived from [`AppConfig`].
#[derive(Clone, Copy, Debug)]
pub struct LedgerSettings {
    pub lock_timeout: Duration,
    pub max_conflict_retries: u32,
    pub business_offset: FixedOffset,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LEDGER_LOCK_TIMEOUT_MS),
            max_conflict_retries: DEFAULT_LEDGER_MAX_CONFLICT_RETRIES,
            business_offset: offset_from_minutes(DEFAULT_BUSINESS_UTC_OFFSET_MINUTES),
        }
    }
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            business_utc_offset_minutes: default_business_utc_offset_minutes(),
            ledger_lock_timeout_ms: default_ledger_lock_timeout_ms(),
            ledger_max_conflict_retries: default_ledger_max_conflict_retries(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn business_offset(&self) -> FixedOffset {
        offset_from_minutes(self.business_utc_offset_minutes)
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            lock_timeout: Duration::from_millis(self.ledger_lock_timeout_ms),
            max_conflict_retries: self.ledger_max_conflict_retries,
            business_offset: self.business_offset(),
        }
    }

    /// Clamps a requested page size into the configured bounds
    pub fn page_limit(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.api_default_page_size as u64)
            .clamp(1, self.api_max_page_size as u64)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.api_default_page_size > self.api_max_page_size {
            let mut err = ValidationError::new("api_default_page_size");
            err.message = Some("api_default_page_size must not exceed api_max_page_size".into());
            errors.add("api_default_page_size", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if !(-840..=840).contains(&self.business_utc_offset_minutes) {
            let mut err = ValidationError::new("business_utc_offset_minutes");
            err.message = Some("business_utc_offset_minutes must be within -840..=840".into());
            errors.add("business_utc_offset_minutes", err);
        }

        if self.ledger_lock_timeout_ms == 0 {
            let mut err = ValidationError::new("ledger_lock_timeout_ms");
            err.message = Some("ledger_lock_timeout_ms must be greater than 0".into());
            errors.add("ledger_lock_timeout_ms", err);
        }

        if self.event_channel_capacity == 0 {
            let mut err = ValidationError::new("event_channel_capacity");
            err.message = Some("event_channel_capacity must be greater than 0".into());
            errors.add("event_channel_capacity", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_api_page_size() -> u32 {
    20
}

fn default_api_max_page_size() -> u32 {
    100
}

fn default_business_utc_offset_minutes() -> i32 {
    DEFAULT_BUSINESS_UTC_OFFSET_MINUTES
}

fn default_ledger_lock_timeout_ms() -> u64 {
    DEFAULT_LEDGER_LOCK_TIMEOUT_MS
}

fn default_ledger_max_conflict_retries() -> u32 {
    DEFAULT_LEDGER_MAX_CONFLICT_RETRIES
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

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stock_ledger={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same layering as [`load_config`] against an explicit config directory
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_profile(dir, &run_env)
}

fn load_profile(dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://stock_ledger.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        )
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn default_page_size_cannot_exceed_max() {
        let mut cfg = base_config();
        cfg.api_default_page_size = 500;
        cfg.api_max_page_size = 100;
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("api_default_page_size"));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("log_level"));
    }

    #[test]
    fn business_offset_defaults_to_plus_three_hours() {
        let cfg = base_config();
        assert_eq!(cfg.business_offset().local_minus_utc(), 3 * 3600);
        assert_eq!(
            cfg.ledger_settings().lock_timeout,
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn page_limit_is_clamped() {
        let cfg = base_config();
        assert_eq!(cfg.page_limit(None), 20);
        assert_eq!(cfg.page_limit(Some(0)), 1);
        assert_eq!(cfg.page_limit(Some(10_000)), 100);
    }

    #[test]
    fn profile_file_overrides_default_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
                database_url = "sqlite://from-default.db"
                port = 9000
                ledger_max_conflict_retries = 5
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            r#"
                port = 9100
                business_utc_offset_minutes = 60
            "#,
        )
        .unwrap();

        let cfg = load_profile(dir.path(), "staging").unwrap();

        assert_eq!(cfg.database_url, "sqlite://from-default.db");
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.ledger_max_conflict_retries, 5);
        assert_eq!(cfg.business_offset().local_minus_utc(), 3600);
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
                log_level = "chatty"
                business_utc_offset_minutes = 5000
            "#,
        )
        .unwrap();

        let result = load_profile(dir.path(), "qa");
        assert_matches!(result, Err(AppConfigError::Validation(_)));
    }
}
