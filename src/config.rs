use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8000;
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://storefront.db?mode=rwc";
const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_FLOW_TIMEOUT_SECS: u64 = 100;
const DEFAULT_GATEWAY_ENDPOINT: &str = "https://test-payment.momo.vn/v2/gateway/api/create";
const DEFAULT_REQUEST_TYPE: &str = "captureWallet";
/// 2024-01-01T00:00:00Z
const DEFAULT_ID_EPOCH_MS: u64 = 1_704_067_200_000;

/// Payment gateway credentials and call policy.
///
/// `secret_key` has no default; it must come from a config file or
/// `APP__PAYMENT__SECRET_KEY`.
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Gateway "create payment" endpoint
    #[serde(default = "default_gateway_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[validate(length(min = 1))]
    pub partner_code: String,

    #[validate(length(min = 1))]
    pub access_key: String,

    /// Shared HMAC secret
    #[validate(length(min = 1))]
    pub secret_key: String,

    /// Where the gateway sends the shopper after paying
    #[validate(url)]
    pub redirect_url: String,

    /// Instant payment notification callback
    #[validate(url)]
    pub ipn_url: String,

    #[serde(default = "default_request_type")]
    #[validate(length(min = 1))]
    pub request_type: String,

    #[serde(default = "default_lang")]
    pub lang: String,

    /// Opaque pass-through data attached to every request
    #[serde(default)]
    pub extra_data: String,

    /// Per-attempt HTTP timeout
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    #[serde(default = "default_gateway_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// First retry delay; doubles on each further attempt
    #[serde(default = "default_gateway_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl PaymentGatewayConfig {
    pub fn new(
        endpoint: impl Into<String>,
        partner_code: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            partner_code: partner_code.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            redirect_url: "http://localhost:8000/user/view-payment".to_string(),
            ipn_url: "http://localhost:8000/user/view-payment".to_string(),
            request_type: default_request_type(),
            lang: default_lang(),
            extra_data: String::new(),
            request_timeout_secs: default_gateway_timeout_secs(),
            max_attempts: default_gateway_max_attempts(),
            retry_backoff_ms: default_gateway_backoff_ms(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl fmt::Debug for PaymentGatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentGatewayConfig")
            .field("endpoint", &self.endpoint)
            .field("partner_code", &self.partner_code)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("ipn_url", &self.ipn_url)
            .field("request_type", &self.request_type)
            .field("lang", &self.lang)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

/// Request id generator settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RequestIdConfig {
    /// Process discriminator, unique per running instance (10 bits)
    #[serde(default)]
    #[validate(range(max = 1023))]
    pub machine_id: u16,

    /// Custom epoch, milliseconds since the Unix epoch
    #[serde(default = "default_id_epoch_ms")]
    pub epoch_ms: u64,

    /// Largest clock regression the generator waits out before failing
    #[serde(default = "default_max_clock_rewind_ms")]
    #[validate(range(max = 1000))]
    pub max_clock_rewind_ms: u64,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self {
            machine_id: 0,
            epoch_ms: default_id_epoch_ms(),
            max_clock_rewind_ms: default_max_clock_rewind_ms(),
        }
    }
}

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
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

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

    /// Deadline for single cart mutations (seconds)
    #[serde(default = "default_storage_timeout_secs")]
    #[validate(range(min = 1))]
    pub storage_timeout_secs: u64,

    /// Deadline for aggregation, checkout and payment flows (seconds)
    #[serde(default = "default_flow_timeout_secs")]
    #[validate(range(min = 1))]
    pub flow_timeout_secs: u64,

    /// Attempts for a cart mutation that lost an optimistic-concurrency race
    #[serde(default = "default_cart_conflict_retries")]
    #[validate(range(min = 1, max = 10))]
    pub cart_conflict_retries: u32,

    /// Decimal places of the minor currency unit used to render amounts
    #[serde(default = "default_money_scale")]
    #[validate(range(max = 18))]
    pub money_scale: u32,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[validate]
    pub payment: PaymentGatewayConfig,

    #[serde(default)]
    #[validate]
    pub request_id: RequestIdConfig,
}

impl AppConfig {
    /// Builds a configuration with defaults for everything except the
    /// database and gateway, e.g. for tests and tools.
    pub fn new(database_url: impl Into<String>, payment: PaymentGatewayConfig) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            storage_timeout_secs: default_storage_timeout_secs(),
            flow_timeout_secs: default_flow_timeout_secs(),
            cart_conflict_retries: default_cart_conflict_retries(),
            money_scale: default_money_scale(),
            cors_allowed_origins: None,
            event_channel_capacity: default_event_channel_capacity(),
            payment,
            request_id: RequestIdConfig::default(),
        }
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    16
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

fn default_storage_timeout_secs() -> u64 {
    DEFAULT_STORAGE_TIMEOUT_SECS
}

fn default_flow_timeout_secs() -> u64 {
    DEFAULT_FLOW_TIMEOUT_SECS
}

fn default_cart_conflict_retries() -> u32 {
    3
}

fn default_money_scale() -> u32 {
    2
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_gateway_endpoint() -> String {
    DEFAULT_GATEWAY_ENDPOINT.to_string()
}

fn default_request_type() -> String {
    DEFAULT_REQUEST_TYPE.to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_gateway_max_attempts() -> u32 {
    3
}

fn default_gateway_backoff_ms() -> u64 {
    200
}

fn default_id_epoch_ms() -> u64 {
    DEFAULT_ID_EPOCH_MS
}

fn default_max_clock_rewind_ms() -> u64 {
    5
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

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let builder = fmt().with_env_filter(EnvFilter::new(filter_directive));
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already installed: {}", err);
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
    // Support both RUN_ENV and APP_ENV for selecting config profile
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

    // NOTE: payment.secret_key has no default - it MUST be provided via
    // environment variable or config file.
    let config = Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("payment.secret_key").is_err() {
        error!("Payment secret key is not configured. Set APP__PAYMENT__SECRET_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "payment.secret_key is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
