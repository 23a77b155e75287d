//! SQLite-backed dose event store.
//! Append-mostly log of doses with a write-once notified marker.
//! The conditional claim is the only synchronization point between monitors.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use dosewatch_core::{DoseError, DoseEvent, Result, TreatmentType};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

/// Fixed-width timestamp format: lexicographic order equals time order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// How long a writer waits on another process's lock before giving up.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Result of an attempt to claim the notification for a dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller set `notified_at` and owns the delivery.
    Claimed,
    /// Someone else already claimed it. Not an error.
    AlreadyClaimed,
}

/// Durable dose event log.
pub struct DoseStore {
    conn: Mutex<Connection>,
}

impl DoseStore {
    /// Open or create the dose database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // WAL lets HTTP readers proceed while the monitor writes.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("⚠️ SQLite journal_mode is '{mode}', not WAL");
        }
        Self::init(conn)
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock().execute_batch(
            "
            -- One row per dose. The primary key is the idempotency guard's key.
            CREATE TABLE IF NOT EXISTS dose_events (
                treatment_type TEXT NOT NULL,
                dosage_at TEXT NOT NULL,
                notified_at TEXT,
                PRIMARY KEY (treatment_type, dosage_at)
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // SQLite rolls back unfinished statements, so poisoning is ignored.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Writes ──────────────────────────────────────────────

    /// Record a dose taken now.
    pub fn record_dose(&self, treatment: TreatmentType) -> Result<DoseEvent> {
        self.record_dose_at(treatment, Utc::now())
    }

    /// Record a dose taken at `at`.
    pub fn record_dose_at(&self, treatment: TreatmentType, at: DateTime<Utc>) -> Result<DoseEvent> {
        let at = truncate(at);
        self.lock().execute(
            "INSERT INTO dose_events (treatment_type, dosage_at) VALUES (?1, ?2)",
            params![treatment.as_str(), fmt_ts(at)],
        )?;
        tracing::debug!("💾 Recorded {} dose at {}", treatment, at);
        Ok(DoseEvent {
            treatment_type: treatment,
            dosage_at: at,
            notified_at: None,
        })
    }

    /// Remove the most recent dose and return it.
    ///
    /// With `allow_notified = false` a dose whose notification was already
    /// claimed is kept and `AlreadyNotified` is returned.
    pub fn delete_last(&self, treatment: TreatmentType, allow_notified: bool) -> Result<DoseEvent> {
        let mut conn = self.lock();
        // IMMEDIATE takes the write lock up front so a concurrent claim
        // cannot land between the check and the delete.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let last = query_last(&tx, treatment)?.ok_or(DoseError::NotFound(treatment))?;

        if let Some(notified_at) = last.notified_at {
            if !allow_notified {
                return Err(DoseError::AlreadyNotified(notified_at));
            }
            tracing::warn!(
                "⚠️ Deleting {} dose at {} that was already notified at {}",
                treatment,
                last.dosage_at,
                notified_at
            );
        }

        tx.execute(
            "DELETE FROM dose_events WHERE treatment_type = ?1 AND dosage_at = ?2",
            params![treatment.as_str(), fmt_ts(last.dosage_at)],
        )?;
        tx.commit()?;
        Ok(last)
    }

    /// Claim the notification for a dose, stamping `notified_at` with now.
    pub fn claim_notification(
        &self,
        treatment: TreatmentType,
        dosage_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        self.claim_notification_at(treatment, dosage_at, Utc::now())
    }

    /// Set `notified_at = now` only if it is still unset.
    ///
    /// A single conditional UPDATE: of any number of concurrent callers, in
    /// this process or another one sharing the file, exactly one sees a
    /// changed row.
    pub fn claim_notification_at(
        &self,
        treatment: TreatmentType,
        dosage_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE dose_events SET notified_at = ?3
             WHERE treatment_type = ?1 AND dosage_at = ?2 AND notified_at IS NULL",
            params![treatment.as_str(), fmt_ts(truncate(dosage_at)), fmt_ts(truncate(now))],
        )?;
        if changed == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM dose_events WHERE treatment_type = ?1 AND dosage_at = ?2)",
            params![treatment.as_str(), fmt_ts(truncate(dosage_at))],
            |r| r.get(0),
        )?;
        if exists {
            Ok(ClaimOutcome::AlreadyClaimed)
        } else {
            Err(DoseError::NotFound(treatment))
        }
    }

    // ─── Reads ───────────────────────────────────────────────

    /// The most recent dose for a treatment type.
    pub fn last_dose(&self, treatment: TreatmentType) -> Result<DoseEvent> {
        query_last(&self.lock(), treatment)?.ok_or(DoseError::NotFound(treatment))
    }

    /// All doses, most recent first, optionally limited to the last `cutoff`.
    pub fn history(&self, treatment: TreatmentType, cutoff: Option<Duration>) -> Result<Vec<DoseEvent>> {
        self.history_at(treatment, cutoff, Utc::now())
    }

    pub fn history_at(
        &self,
        treatment: TreatmentType,
        cutoff: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DoseEvent>> {
        // Without a cutoff, the empty string sorts before every timestamp.
        let after = cutoff
            .and_then(|c| now.checked_sub_signed(c))
            .map(|t| fmt_ts(truncate(t)))
            .unwrap_or_default();

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT treatment_type, dosage_at, notified_at FROM dose_events
             WHERE treatment_type = ?1 AND dosage_at >= ?2
             ORDER BY dosage_at DESC",
        )?;
        let rows = stmt.query_map(params![treatment.as_str(), after], map_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row??);
        }
        Ok(events)
    }

    /// Next due time, or `None` if nothing has been recorded yet.
    pub fn next_due(&self, treatment: TreatmentType, interval: Duration) -> Result<Option<DateTime<Utc>>> {
        match self.last_dose(treatment) {
            Ok(last) => Ok(Some(crate::due::next_due_time(&last, interval))),
            Err(DoseError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of recorded doses.
    pub fn count(&self, treatment: TreatmentType) -> Result<u64> {
        let n: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM dose_events WHERE treatment_type = ?1",
            [treatment.as_str()],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }
}

fn query_last(conn: &Connection, treatment: TreatmentType) -> Result<Option<DoseEvent>> {
    let row = conn
        .query_row(
            "SELECT treatment_type, dosage_at, notified_at FROM dose_events
             WHERE treatment_type = ?1 ORDER BY dosage_at DESC LIMIT 1",
            [treatment.as_str()],
            map_row,
        )
        .optional()?;
    row.transpose()
}

type RowResult = Result<DoseEvent>;

/// Map a row, deferring domain parse errors so they surface as `DoseError`.
fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowResult> {
    let treatment: String = row.get(0)?;
    let dosage_at: String = row.get(1)?;
    let notified_at: Option<String> = row.get(2)?;
    Ok(decode(&treatment, &dosage_at, notified_at.as_deref()))
}

fn decode(treatment: &str, dosage_at: &str, notified_at: Option<&str>) -> Result<DoseEvent> {
    Ok(DoseEvent {
        treatment_type: treatment
            .parse()
            .map_err(|_| DoseError::Corrupt(format!("unknown treatment type '{treatment}'")))?,
        dosage_at: parse_ts(dosage_at)?,
        notified_at: notified_at.map(parse_ts).transpose()?,
    })
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|n| n.and_utc())
        .map_err(|e| DoseError::Corrupt(format!("timestamp '{s}': {e}")))
}

/// Drop sub-microsecond precision so values round-trip through the database.
fn truncate(t: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::DurationRound;
    t.duration_trunc(Duration::microseconds(1)).unwrap_or(t)
}
