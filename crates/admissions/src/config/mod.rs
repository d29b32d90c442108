use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::admissions::documents::DEFAULT_MAX_UPLOAD_BYTES;

const DEFAULT_APPLICATION_FEE_MINOR: u64 = 5_000;
const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the admissions service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub admissions: AdmissionsConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::from_str(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        );

        let admissions = AdmissionsConfig::from_env()?;
        if environment == AppEnvironment::Production && admissions.webhook_secret.is_empty() {
            return Err(ConfigError::MissingWebhookSecret);
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                format: log_format,
            },
            admissions,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Output shape of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Knobs for the application lifecycle, fee collection, and upload policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionsConfig {
    /// Prefix of human-readable application ids, e.g. `MIU` in `MIU-2025-0001`.
    pub application_id_prefix: String,
    /// Prefix of admission numbers issued on acceptance.
    pub admission_number_prefix: String,
    /// Application fee in minor currency units.
    pub application_fee_minor: u64,
    pub currency: String,
    pub gateway_timeout: Duration,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub max_upload_bytes: u64,
}

impl Default for AdmissionsConfig {
    fn default() -> Self {
        Self {
            application_id_prefix: "MIU".to_string(),
            admission_number_prefix: "ADM".to_string(),
            application_fee_minor: DEFAULT_APPLICATION_FEE_MINOR,
            currency: "usd".to_string(),
            gateway_timeout: Duration::from_millis(DEFAULT_GATEWAY_TIMEOUT_MS),
            webhook_secret: String::new(),
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl AdmissionsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let application_fee_minor =
            parse_var("ADMISSIONS_APPLICATION_FEE", defaults.application_fee_minor)?;
        if application_fee_minor == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "ADMISSIONS_APPLICATION_FEE",
                value: "0".to_string(),
            });
        }

        let timeout_ms = parse_var("ADMISSIONS_GATEWAY_TIMEOUT_MS", DEFAULT_GATEWAY_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "ADMISSIONS_GATEWAY_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }

        let webhook_tolerance_secs = parse_var(
            "ADMISSIONS_WEBHOOK_TOLERANCE_SECS",
            defaults.webhook_tolerance_secs,
        )?;
        if webhook_tolerance_secs < 0 {
            return Err(ConfigError::InvalidNumber {
                name: "ADMISSIONS_WEBHOOK_TOLERANCE_SECS",
                value: webhook_tolerance_secs.to_string(),
            });
        }

        let max_upload_bytes =
            parse_var("ADMISSIONS_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?;
        if max_upload_bytes == 0 || max_upload_bytes > DEFAULT_MAX_UPLOAD_BYTES {
            return Err(ConfigError::UploadLimitOutOfRange(max_upload_bytes));
        }

        let currency = env::var("ADMISSIONS_CURRENCY")
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or(defaults.currency);
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidCurrency(currency));
        }

        Ok(Self {
            application_id_prefix: env::var("ADMISSIONS_ID_PREFIX")
                .unwrap_or(defaults.application_id_prefix),
            admission_number_prefix: env::var("ADMISSIONS_NUMBER_PREFIX")
                .unwrap_or(defaults.admission_number_prefix),
            application_fee_minor,
            currency,
            gateway_timeout: Duration::from_millis(timeout_ms),
            webhook_secret: env::var("ADMISSIONS_WEBHOOK_SECRET").unwrap_or_default(),
            webhook_tolerance_secs,
            max_upload_bytes,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    InvalidCurrency(String),
    UploadLimitOutOfRange(u64),
    MissingWebhookSecret,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive number (found '{value}')")
            }
            ConfigError::InvalidCurrency(value) => {
                write!(f, "ADMISSIONS_CURRENCY must be a three letter code (found '{value}')")
            }
            ConfigError::UploadLimitOutOfRange(value) => write!(
                f,
                "ADMISSIONS_MAX_UPLOAD_BYTES must be between 1 and {DEFAULT_MAX_UPLOAD_BYTES} (found {value})"
            ),
            ConfigError::MissingWebhookSecret => {
                write!(f, "ADMISSIONS_WEBHOOK_SECRET is required in production")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
