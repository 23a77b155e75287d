//! Unified error types for DoseWatch.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::TreatmentType;

/// Result type alias using DoseError.
pub type Result<T> = std::result::Result<T, DoseError>;

#[derive(Error, Debug)]
pub enum DoseError {
    /// No dose has been recorded for the treatment type yet.
    #[error("No dose recorded for {0}")]
    NotFound(TreatmentType),

    /// Delete refused: the dose was already notified on.
    #[error("Dose at {0} was already notified on")]
    AlreadyNotified(DateTime<Utc>),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A stored row could not be decoded.
    #[error("Storage error: corrupt record: {0}")]
    Corrupt(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Delivery to {endpoint} failed{}: {message}", status_suffix(.status))]
    Delivery {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl DoseError {
    /// Expected absence, not a failure for control flow.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DoseError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_message_includes_status() {
        let err = DoseError::Delivery {
            endpoint: "https://push.example.com".into(),
            status: Some(401),
            message: "unauthorized".into(),
        };
        assert_eq!(
            err.to_string(),
            "Delivery to https://push.example.com failed (status 401): unauthorized"
        );

        let err = DoseError::Delivery {
            endpoint: "https://push.example.com".into(),
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Delivery to https://push.example.com failed: connection refused"
        );
    }

    #[test]
    fn test_corrupt_reads_as_storage() {
        let err = DoseError::Corrupt("bad timestamp".into());
        assert_eq!(err.to_string(), "Storage error: corrupt record: bad timestamp");
    }

    #[test]
    fn test_not_found_is_expected() {
        assert!(DoseError::NotFound(TreatmentType::Gel).is_not_found());
        assert!(!DoseError::Template("bad".into()).is_not_found());
    }
}
