//! DoseWatch configuration system.

use chrono::Duration;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::error::{DoseError, Result};
use crate::types::TreatmentType;

/// Longest accepted dose interval (100 years).
pub const MAX_INTERVAL_DAYS: i64 = 36_500;

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DoseWatchConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    pub treatment: TreatmentConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    pub gotify: GotifyConfig,
}

fn default_database_path() -> String { "~/.dosewatch/dosewatch.db".into() }
fn default_listen_address() -> String { "127.0.0.1:8375".into() }

/// The one schedule this process tracks.
#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentConfig {
    #[serde(rename = "type")]
    pub treatment_type: TreatmentType,
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

/// Notification monitor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Allow undoing a dose that has already been notified on.
    #[serde(default)]
    pub allow_delete_notified: bool,
    /// strftime format for timestamps in notifications (RFC 3339 when unset).
    #[serde(default)]
    pub time_format: Option<String>,
}

fn default_tick_secs() -> u64 { 30 }
fn default_delivery_timeout_secs() -> u64 { 10 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            allow_delete_notified: false,
            time_format: None,
        }
    }
}

/// Gotify push gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GotifyConfig {
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// Title/message templates and static extras attached to every notification.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_message")]
    pub message: String,
    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

fn default_title() -> String { "Time for your {{treatment_type}} dose".into() }
fn default_message() -> String {
    "Your last dose was at {{last_dose_at}}. The next one was due at {{next_dose_at}}.".into()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            message: default_message(),
            extras: serde_json::Map::new(),
        }
    }
}

impl DoseWatchConfig {
    /// Load config from the default path (~/.dosewatch/config.toml).
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DoseError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DoseError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.treatment.interval <= Duration::zero() {
            return Err(DoseError::Config("treatment.interval must be positive".into()));
        }
        if self.treatment.interval > Duration::days(MAX_INTERVAL_DAYS) {
            return Err(DoseError::Config(format!(
                "treatment.interval must be at most {MAX_INTERVAL_DAYS} days"
            )));
        }
        if self.monitor.tick_secs == 0 {
            return Err(DoseError::Config("monitor.tick_secs must be at least 1".into()));
        }
        if self.gotify.endpoint.trim().is_empty() {
            return Err(DoseError::Config("gotify.endpoint is required".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the DoseWatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dosewatch")
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parse a duration such as "24h", "7d", "1d12h" or "90s".
/// Units: ms, s, m, h, d, w. Each component is a whole number.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DoseError::Config("empty duration".into()));
    }

    let mut total = Duration::zero();
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(DoseError::Config(format!("invalid duration '{input}': expected a number")));
        }
        let value: i64 = rest[..digits]
            .parse()
            .map_err(|e| DoseError::Config(format!("invalid duration '{input}': {e}")))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::try_milliseconds(value),
            "s" => Duration::try_seconds(value),
            "m" => Duration::try_minutes(value),
            "h" => Duration::try_hours(value),
            "d" => Duration::try_days(value),
            "w" => Duration::try_weeks(value),
            "" => return Err(DoseError::Config(format!("invalid duration '{input}': missing unit"))),
            other => {
                return Err(DoseError::Config(format!("invalid duration '{input}': unknown unit '{other}'")));
            }
        };
        rest = &rest[unit_len..];

        total = part
            .and_then(|p| total.checked_add(&p))
            .ok_or_else(|| DoseError::Config(format!("duration '{input}' is out of range")))?;
    }
    Ok(total)
}
