//! # DoseWatch Scheduler
//!
//! Dose event store plus the monitor that turns "a dose is due" into exactly
//! one push notification, no matter how many monitors evaluate it.
//!
//! ## Architecture
//! ```text
//! Monitor (tokio interval)
//!   └── tick
//!        ├── DoseStore::last_dose        → NotFound: skip
//!        ├── due::is_due                 → not due: skip
//!        ├── DoseStore::claim_notification
//!        │     UPDATE ... WHERE notified_at IS NULL
//!        │     → AlreadyClaimed: skip
//!        └── NotificationTemplates::render → Deliver::send (Gotify)
//! ```
//!
//! The claim is committed before delivery, so a failed send is never retried:
//! a missed reminder is preferred over a duplicate one.

pub mod dispatch;
pub mod due;
pub mod engine;
pub mod persistence;
pub mod template;

pub use dispatch::{Deliver, GotifyTransport};
pub use engine::{Monitor, MonitorState, Schedule, TickOutcome};
pub use persistence::{ClaimOutcome, DoseStore};
pub use template::NotificationTemplates;
