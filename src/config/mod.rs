//! Configuration management
//!
//! Configuration is read from `config.yml` and may be overridden with
//! `MATCHDESK_*` environment variables. Missing values fall back to defaults.

use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "MATCHDESK";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub curation: CurationConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin of the admin console
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/matchdesk.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Admin API access
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token required on every `/api/v1/admin` request.
    /// When unset, admin routes reject all requests.
    #[serde(default)]
    pub token: Option<String>,
}

/// How long an approved entity stays active before the expiry sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default = "default_listing_expiry_days")]
    pub listing_expiry_days: u32,
    #[serde(default = "default_requirement_expiry_days")]
    pub requirement_expiry_days: u32,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            listing_expiry_days: default_listing_expiry_days(),
            requirement_expiry_days: default_requirement_expiry_days(),
        }
    }
}

fn default_listing_expiry_days() -> u32 {
    45
}

fn default_requirement_expiry_days() -> u32 {
    90
}

/// Recommended feed curation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationConfig {
    /// Number of listings drawn when random mode is switched on
    #[serde(default = "default_random_batch_size")]
    pub random_batch_size: usize,
    /// Maximum number of candidates returned by the available-listings view
    #[serde(default = "default_available_limit")]
    pub available_limit: usize,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            random_batch_size: default_random_batch_size(),
            available_limit: default_available_limit(),
        }
    }
}

fn default_random_batch_size() -> usize {
    5
}

fn default_available_limit() -> usize {
    50
}

/// Fallback free-tier limits used until an operator stores explicit values.
/// Zero means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_free_listings_per_month")]
    pub free_listings_per_month: i64,
    #[serde(default = "default_free_requirements_per_month")]
    pub free_requirements_per_month: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_listings_per_month: default_free_listings_per_month(),
            free_requirements_per_month: default_free_requirements_per_month(),
        }
    }
}

fn default_free_listings_per_month() -> i64 {
    1
}

fn default_free_requirements_per_month() -> i64 {
    5
}

/// Statistics reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Offset from UTC, in minutes, of the timezone whose midnight starts "today"
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with the location.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Recognised variables:
    /// - MATCHDESK_SERVER_HOST
    /// - MATCHDESK_SERVER_PORT
    /// - MATCHDESK_SERVER_CORS_ORIGIN
    /// - MATCHDESK_DATABASE_DRIVER
    /// - MATCHDESK_DATABASE_URL
    /// - MATCHDESK_ADMIN_TOKEN
    /// - MATCHDESK_CURATION_RANDOM_BATCH_SIZE
    /// - MATCHDESK_REPORTING_UTC_OFFSET_MINUTES
    ///
    /// Values that fail to parse are ignored.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.curation.random_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "curation.random_batch_size must be at least 1".to_string(),
            ));
        }
        if self.limits.free_listings_per_month < 0 || self.limits.free_requirements_per_month < 0 {
            return Err(ConfigError::ValidationError(
                "limits must not be negative".to_string(),
            ));
        }
        // Real-world offsets stay within +-14h
        if self.reporting.utc_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigError::ValidationError(format!(
                "reporting.utc_offset_minutes out of range: {}",
                self.reporting.utc_offset_minutes
            )));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(host) = env_var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_var("SERVER_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(cors_origin) = env_var("SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Some(driver) = env_var("DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {}
            }
        }
        if let Some(url) = env_var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(token) = env_var("ADMIN_TOKEN") {
            self.admin.token = if token.is_empty() { None } else { Some(token) };
        }

        if let Some(size) = env_var("CURATION_RANDOM_BATCH_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|s| *s > 0)
        {
            self.curation.random_batch_size = size;
        }

        if let Some(offset) =
            env_var("REPORTING_UTC_OFFSET_MINUTES").and_then(|s| s.parse::<i32>().ok())
        {
            self.reporting.utc_offset_minutes = offset;
        }
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, suffix)).ok()
}

/// Format YAML parsing error with location
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches MATCHDESK_* variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ALL_ENV_KEYS: &[&str] = &[
    "MATCHDESK_SERVER_HOST",
    "MATCHDESK_SERVER_PORT",
    "MATCHDESK_SERVER_CORS_ORIGIN",
    "MATCHDESK_DATABASE_DRIVER",
    "MATCHDESK_DATABASE_URL",
    "MATCHDESK_ADMIN_TOKEN",
    "MATCHDESK_CURATION_RANDOM_BATCH_SIZE",
    "MATCHDESK_REPORTING_UTC_OFFSET_MINUTES",
];
