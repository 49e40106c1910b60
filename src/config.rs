use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

pub const DEFAULT_CALENDAR_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SLOTBOOK_TIMEZONE: unknown time zone {0:?}")]
    Timezone(String),
    #[error("SLOTBOOK_LOG_FORMAT: expected text or json, got {0:?}")]
    LogFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarConfig {
    pub id: String,
    pub base_url: String,
    /// Bearer token; `None` for endpoints that need no auth (e.g. a local proxy).
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Process settings, read once from `SLOTBOOK_*` environment variables.
///
/// Numeric values that fail to parse fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub timezone: Tz,
    pub catalog: Option<PathBuf>,
    /// `None` runs without an external calendar.
    pub calendar: Option<CalendarConfig>,
    pub notify_webhook: Option<String>,
    pub business_name: String,
    /// `None` disables the owner endpoints.
    pub admin_token: Option<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timezone = match var("SLOTBOOK_TIMEZONE") {
            Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::Timezone(name))?,
            None => chrono_tz::UTC,
        };
        let log_format = match var("SLOTBOOK_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(ConfigError::LogFormat(other.to_string())),
        };
        let calendar = match var("SLOTBOOK_CALENDAR_ID") {
            Some(id) => Some(CalendarConfig {
                id,
                base_url: var("SLOTBOOK_CALENDAR_URL").unwrap_or_else(|| DEFAULT_CALENDAR_URL.into()),
                token: var("SLOTBOOK_CALENDAR_TOKEN"),
                timeout: Duration::from_secs(var("SLOTBOOK_CALENDAR_TIMEOUT_SECS").and_then(|s| s.parse().ok()).unwrap_or(10)),
            }),
            None => None,
        };

        Ok(Self {
            bind: var("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("SLOTBOOK_PORT").and_then(|s| s.parse().ok()).unwrap_or(3000),
            metrics_port: var("SLOTBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            data_dir: var("SLOTBOOK_DATA_DIR").map(PathBuf::from),
            timezone,
            catalog: var("SLOTBOOK_CATALOG").map(PathBuf::from),
            calendar,
            notify_webhook: var("SLOTBOOK_NOTIFY_WEBHOOK"),
            business_name: var("SLOTBOOK_BUSINESS_NAME").unwrap_or_else(|| "Aura Salon".into()),
            admin_token: var("SLOTBOOK_ADMIN_TOKEN"),
            log_format,
        })
    }

    /// Timeout shared by outbound HTTP collaborators.
    pub fn http_timeout(&self) -> Duration {
        self.calendar
            .as_ref()
            .map_or(Duration::from_secs(10), |c| c.timeout)
    }
}
