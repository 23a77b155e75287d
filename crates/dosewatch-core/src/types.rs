//! Dose data model — the records the store persists and the notification payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DoseError;

/// Treatment delivery method. Each type is one logical schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreatmentType {
    Patches,
    Gel,
    Sublingual,
    Injection,
}

impl TreatmentType {
    pub const ALL: [TreatmentType; 4] = [
        TreatmentType::Patches,
        TreatmentType::Gel,
        TreatmentType::Sublingual,
        TreatmentType::Injection,
    ];

    /// Stable string form used in the database and the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentType::Patches => "patches",
            TreatmentType::Gel => "gel",
            TreatmentType::Sublingual => "sublingual",
            TreatmentType::Injection => "injection",
        }
    }
}

impl fmt::Display for TreatmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreatmentType {
    type Err = DoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TreatmentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DoseError::Config(format!("unknown treatment type: '{s}'")))
    }
}

/// A single recorded administration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseEvent {
    pub treatment_type: TreatmentType,
    /// When the dose was taken. Identity of the event within its type.
    pub dosage_at: DateTime<Utc>,
    /// Set once, when a notification is claimed for this dose.
    pub notified_at: Option<DateTime<Utc>>,
}

impl DoseEvent {
    pub fn is_notified(&self) -> bool {
        self.notified_at.is_some()
    }
}

/// Outbound notification, in Gotify's message format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

/// Values substituted into the title and message templates.
#[derive(Debug, Clone)]
pub struct NotificationTemplateData {
    pub last_dose_at: DateTime<Utc>,
    pub next_dose_at: DateTime<Utc>,
    pub treatment_type: TreatmentType,
    /// Time elapsed since the dose became due, at render time.
    pub overdue: chrono::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_treatment_type_roundtrip_strings() {
        for t in TreatmentType::ALL {
            assert_eq!(t.as_str().parse::<TreatmentType>().unwrap(), t);
        }
        assert!("pill".parse::<TreatmentType>().is_err());
    }

    #[test]
    fn test_treatment_type_serde_lowercase() {
        let json = serde_json::to_string(&TreatmentType::Sublingual).unwrap();
        assert_eq!(json, "\"sublingual\"");
    }

    #[test]
    fn test_notification_skips_empty_extras() {
        let n = Notification {
            title: "t".into(),
            message: "m".into(),
            extras: serde_json::Map::new(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert!(json.get("extras").is_none());
    }
}
