//! Notification monitor — the loop that decides when a dose notification fires.
//! Stateless across ticks: every tick re-reads the store, and the store's
//! conditional claim decides which evaluation gets to deliver.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dosewatch_core::{DoseError, DoseEvent, Notification, NotificationTemplateData, Result, TreatmentType};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::dispatch::Deliver;
use crate::due;
use crate::persistence::{ClaimOutcome, DoseStore};
use crate::template::NotificationTemplates;

/// The schedule this monitor watches.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub treatment_type: TreatmentType,
    pub interval: Duration,
    /// Static extras attached to every notification.
    pub extras: serde_json::Map<String, serde_json::Value>,
    pub tick: StdDuration,
    /// Upper bound on one delivery attempt.
    pub delivery_timeout: StdDuration,
}

/// What the monitor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Waiting,
    Evaluating,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No dose recorded yet.
    Unscheduled,
    NotDue { next_due: DateTime<Utc> },
    /// Another evaluation already owns this dose.
    AlreadyClaimed,
    Delivered,
    /// Claimed, but rendering or sending failed. Not retried.
    DeliveryFailed,
}

/// The notification monitor.
pub struct Monitor {
    store: Arc<DoseStore>,
    schedule: Schedule,
    templates: NotificationTemplates,
    transport: Arc<dyn Deliver>,
    state: AtomicU8,
}

impl Monitor {
    /// Templates are compiled by the caller so a bad template fails startup.
    pub fn new(
        store: Arc<DoseStore>,
        schedule: Schedule,
        templates: NotificationTemplates,
        transport: Arc<dyn Deliver>,
    ) -> Self {
        Self {
            store,
            schedule,
            templates,
            transport,
            state: AtomicU8::new(MonitorState::Waiting as u8),
        }
    }

    pub fn state(&self) -> MonitorState {
        match self.state.load(Ordering::Acquire) {
            s if s == MonitorState::Evaluating as u8 => MonitorState::Evaluating,
            _ => MonitorState::Waiting,
        }
    }

    fn set_state(&self, state: MonitorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run one evaluation as of `now`.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.set_state(MonitorState::Evaluating);
        let outcome = self.evaluate_inner(now).await;
        self.set_state(MonitorState::Waiting);
        outcome
    }

    async fn evaluate_inner(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let treatment = self.schedule.treatment_type;
        let last = match self.store.last_dose(treatment) {
            Ok(dose) => dose,
            Err(DoseError::NotFound(_)) => {
                tracing::debug!("No {} dose recorded yet, nothing to schedule", treatment);
                return Ok(TickOutcome::Unscheduled);
            }
            Err(e) => return Err(e),
        };

        let next_due = due::next_due_time(&last, self.schedule.interval);
        if !due::is_due(&last, self.schedule.interval, now) {
            tracing::debug!(
                "Next {} dose due at {} (in {}m)",
                treatment,
                next_due,
                due::time_until_due(&last, self.schedule.interval, now).num_minutes()
            );
            return Ok(TickOutcome::NotDue { next_due });
        }

        match self.store.claim_notification_at(treatment, last.dosage_at, now) {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => {
                tracing::debug!("{} dose at {} already notified", treatment, last.dosage_at);
                return Ok(TickOutcome::AlreadyClaimed);
            }
            // Undone between the read and the claim.
            Err(DoseError::NotFound(_)) => return Ok(TickOutcome::Unscheduled),
            Err(e) => return Err(e),
        }

        tracing::info!("🔔 {} dose due since {}, notifying", treatment, next_due);
        Ok(self.deliver(&last, next_due, now).await)
    }

    /// Render and send. Failures are logged and final for this dose.
    async fn deliver(&self, last: &DoseEvent, next_due: DateTime<Utc>, now: DateTime<Utc>) -> TickOutcome {
        let data = NotificationTemplateData {
            last_dose_at: last.dosage_at,
            next_dose_at: next_due,
            treatment_type: last.treatment_type,
            overdue: now - next_due,
        };

        let (title, message) = match self.templates.render(&data) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!("❌ Failed to render notification for {:?}: {e}", data);
                return TickOutcome::DeliveryFailed;
            }
        };

        let notification = Notification {
            title,
            message,
            extras: self.schedule.extras.clone(),
        };

        let sent = tokio::time::timeout(self.schedule.delivery_timeout, self.transport.send(&notification)).await;
        match sent {
            Ok(Ok(())) => TickOutcome::Delivered,
            Ok(Err(e)) => {
                tracing::error!("❌ Notification delivery failed: {e}");
                TickOutcome::DeliveryFailed
            }
            Err(_) => {
                tracing::error!(
                    "❌ Notification delivery to {} timed out after {:?}",
                    self.transport.endpoint(),
                    self.schedule.delivery_timeout
                );
                TickOutcome::DeliveryFailed
            }
        }
    }

    /// Tick until `shutdown` flips to true. An in-flight tick is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Monitor started for {} (interval {}, check every {}s)",
            self.schedule.treatment_type,
            self.schedule.interval,
            self.schedule.tick.as_secs()
        );

        let mut interval = tokio::time::interval(self.schedule.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender also means shut down.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            if let Err(e) = self.evaluate(Utc::now()).await {
                tracing::error!("⚠️ Monitor tick failed, retrying next tick: {e}");
            }
        }

        tracing::info!("🛑 Monitor stopped");
    }
}
