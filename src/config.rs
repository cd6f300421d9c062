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
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_DEDUP_CACHE_CAPACITY: usize = 100;
const DEFAULT_DUPLICATE_WINDOW_SECS: i64 = 300;

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

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
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

    /// Stripe API secret key (required at startup)
    #[validate(length(min = 1, message = "Stripe secret key must not be empty"))]
    pub stripe_secret_key: String,

    /// Stripe webhook signing secret (required at startup)
    #[validate(length(min = 1, message = "Stripe webhook secret must not be empty"))]
    pub stripe_webhook_secret: String,

    /// Webhook signature timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub stripe_webhook_tolerance_secs: u64,

    /// Capacity of the in-process webhook de-duplication cache
    #[serde(default = "default_dedup_cache_capacity")]
    #[validate(custom = "validate_dedup_cache_capacity")]
    pub dedup_cache_capacity: usize,

    /// Trailing window (seconds) for the heuristic duplicate-order check
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: i64,

    /// Order creation strategy: "atomic" (transactional, preferred) or
    /// "stepwise" (best-effort manual sequence)
    #[serde(default = "default_order_creation_mode")]
    #[validate(custom = "validate_order_creation_mode")]
    pub order_creation_mode: String,
}

impl AppConfig {
    /// Constructs a configuration with explicit required values and
    /// defaults everywhere else. Primarily used by tests.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database_url: String,
        host: String,
        port: u16,
        environment: String,
        stripe_secret_key: String,
        stripe_webhook_secret: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            dedup_cache_capacity: default_dedup_cache_capacity(),
            duplicate_window_secs: default_duplicate_window_secs(),
            order_creation_mode: default_order_creation_mode(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn prefer_atomic_order_creation(&self) -> bool {
        self.order_creation_mode.eq_ignore_ascii_case("atomic")
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
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

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_dedup_cache_capacity() -> usize {
    DEFAULT_DEDUP_CACHE_CAPACITY
}

fn default_duplicate_window_secs() -> i64 {
    DEFAULT_DUPLICATE_WINDOW_SECS
}

fn default_order_creation_mode() -> String {
    "atomic".to_string()
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

fn validate_order_creation_mode(mode: &str) -> Result<(), ValidationError> {
    match mode.to_ascii_lowercase().as_str() {
        "atomic" | "stepwise" => Ok(()),
        _ => {
            let mut err = ValidationError::new("order_creation_mode");
            err.message = Some("Must be one of: atomic, stepwise".into());
            Err(err)
        }
    }
}

fn validate_dedup_cache_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("dedup_cache_capacity");
        err.message = Some("dedup_cache_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("soleswap_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // NOTE: the Stripe secrets have no defaults - they MUST be provided via
    // environment variables or config file. A missing secret is a startup
    // error, never a per-request one.
    let builder = Config::builder()
        .set_default("database_url", "sqlite://soleswap.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    for key in ["stripe_secret_key", "stripe_webhook_secret"] {
        if config.get_string(key).is_err() {
            error!(
                "{} is not configured. Set APP__{} before starting the service.",
                key,
                key.to_uppercase()
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(format!(
                "{} is required but not configured",
                key
            ))));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite://soleswap.db?mode=memory".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
            "sk_test_123".into(),
            "whsec_test_123".into(),
        )
    }

    #[test]
    fn default_mode_prefers_atomic_creation() {
        let cfg = base_config();
        assert!(cfg.prefer_atomic_order_creation());
    }

    #[test]
    fn stepwise_mode_disables_atomic_preference() {
        let mut cfg = base_config();
        cfg.order_creation_mode = "stepwise".into();
        assert!(!cfg.prefer_atomic_order_creation());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        let mut cfg = base_config();
        cfg.dedup_cache_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_creation_mode_is_rejected() {
        let mut cfg = base_config();
        cfg.order_creation_mode = "yolo".into();
        assert!(cfg.validate().is_err());
    }
}
