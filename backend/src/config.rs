use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
    fetch::DEFAULT_YT_DLP_PROGRAM,
    settings::{Settings, SettingsError, SettingsUpdate},
};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_SWEEP_SECONDS: u64 = 5 * 60;
const DEV_ORIGINS: [&str; 2] = ["http://127.0.0.1:5173", "http://localhost:5173"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub trust_proxy_headers: bool,
    /// Normalized `scheme://host[:port]` values.
    pub allowed_origins: Vec<String>,
    /// `None` disables the admin routes.
    pub admin: Option<AdminCredentials>,
    pub initial_settings: Settings,
    pub sweep_interval: Duration,
    pub yt_dlp_program: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be a boolean, got {value:?}")]
    InvalidBool { name: &'static str, value: String },
    #[error("invalid origin in ALLOWED_ORIGINS: {0}. Use values like https://example.com")]
    InvalidOrigin(String),
    #[error("invalid initial settings: {0}")]
    Settings(#[from] SettingsError),
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let trust_proxy_headers = match var("TRUST_PROXY_HEADERS") {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidBool {
                name: "TRUST_PROXY_HEADERS",
                value,
            })?,
            None => false,
        };

        let admin = var("ADMIN_PASSWORD").map(|password| AdminCredentials {
            username: var("ADMIN_USERNAME")
                .map(|value| value.trim().to_string())
                .unwrap_or_else(|| DEFAULT_ADMIN_USERNAME.to_string()),
            password,
        });

        let overrides = SettingsUpdate {
            rate_limit: parse_number(&var, "RATE_LIMIT")?,
            window_seconds: parse_number(&var, "RATE_LIMIT_WINDOW_SECONDS")?,
            max_file_size_mb: parse_number(&var, "MAX_FILE_SIZE_MB")?,
            ..SettingsUpdate::default()
        };
        let mut initial_settings = Settings::default();
        overrides.apply_to(&mut initial_settings);
        initial_settings.validate()?;

        let sweep_seconds = parse_number(&var, "RATE_LIMIT_SWEEP_SECONDS")?
            .filter(|seconds| *seconds > 0)
            .unwrap_or(DEFAULT_SWEEP_SECONDS);

        Ok(Self {
            bind_addr: resolve_bind_addr(&var)?,
            trust_proxy_headers,
            allowed_origins: resolve_origins(var("ALLOWED_ORIGINS"))?,
            admin,
            initial_settings,
            sweep_interval: Duration::from_secs(sweep_seconds),
            yt_dlp_program: var("YT_DLP_PATH")
                .map(|value| value.trim().to_string())
                .unwrap_or_else(|| DEFAULT_YT_DLP_PROGRAM.to_string()),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidNumber { name, value })
        })
        .transpose()
}

fn resolve_bind_addr(var: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    if let Some(configured) = var("APP_ADDR") {
        return Ok(configured.trim().to_string());
    }

    if let Some(port) = parse_number::<u16>(var, "PORT")? {
        return Ok(format!("0.0.0.0:{port}"));
    }

    Ok(DEFAULT_BIND_ADDR.to_string())
}

fn resolve_origins(configured: Option<String>) -> Result<Vec<String>, ConfigError> {
    let origins = configured
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let origins = if origins.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Falling back to development origins.");
        DEV_ORIGINS.iter().map(ToString::to_string).collect()
    } else {
        origins
    };

    let mut normalized = origins
        .iter()
        .map(|origin| normalize_origin(origin).ok_or_else(|| ConfigError::InvalidOrigin(origin.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
