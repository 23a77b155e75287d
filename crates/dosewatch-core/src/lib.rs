//! # DoseWatch Core
//!
//! Shared building blocks for the DoseWatch workspace: the dose data model,
//! the unified error type, and the TOML configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DoseWatchConfig, parse_duration};
pub use error::{DoseError, Result};
pub use types::{DoseEvent, Notification, NotificationTemplateData, TreatmentType};
