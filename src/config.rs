// Process configuration, read once at startup from the environment (and
// `.env`, loaded by main). Nothing here changes after the server starts;
// the values are handed to the components that need them.

use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_KEY_PATH: &str = "./service-account-key.json";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DRIVE_API_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Where the service account JSON record comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum ServiceAccountSource {
    /// `GOOGLE_SERVICE_ACCOUNT_JSON` - the record itself.
    Json(String),
    /// `GOOGLE_SERVICE_ACCOUNT_KEY` / `GOOGLE_APPLICATION_CREDENTIALS` - a file.
    File(PathBuf),
}

// The inline JSON holds the private key.
impl fmt::Debug for ServiceAccountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAccountSource::Json(_) => f.write_str("Json(<redacted>)"),
            ServiceAccountSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub service_account: ServiceAccountSource,
    pub drive_api_base_url: Url,
    /// Bound on each upstream call (up to response headers for content).
    pub upstream_timeout: Duration,
    /// Reuse bearer tokens until they are about to expire.
    pub token_cache: bool,
}

impl AppConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// an environment variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or("PORT", var("PORT"), DEFAULT_PORT)?;

        let service_account = if let Some(json) = var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            ServiceAccountSource::Json(json)
        } else if let Some(path) = var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            ServiceAccountSource::File(PathBuf::from(path))
        } else {
            ServiceAccountSource::File(PathBuf::from(
                var("GOOGLE_APPLICATION_CREDENTIALS").unwrap_or_else(|| DEFAULT_KEY_PATH.into()),
            ))
        };

        let base_url = var("DRIVE_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_DRIVE_API_BASE_URL.to_string());
        let drive_api_base_url = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or(ConfigError::InvalidValue {
                var: "DRIVE_API_BASE_URL",
                value: base_url,
            })?;

        let timeout_secs = parse_or(
            "UPSTREAM_TIMEOUT_SECS",
            var("UPSTREAM_TIMEOUT_SECS"),
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "UPSTREAM_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        let token_cache = parse_or("TOKEN_CACHE", var("TOKEN_CACHE"), true)?;

        Ok(Self {
            host,
            port,
            service_account,
            drive_api_base_url,
            upstream_timeout: Duration::from_secs(timeout_secs),
            token_cache,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
