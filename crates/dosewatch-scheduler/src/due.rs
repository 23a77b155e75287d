//! Due-time arithmetic. Pure functions, no I/O.

use chrono::{DateTime, Duration, Utc};
use dosewatch_core::DoseEvent;

/// When the dose after `last_dose` is due. Saturates at the end of time,
/// which makes an out-of-range interval never due.
pub fn next_due_time(last_dose: &DoseEvent, interval: Duration) -> DateTime<Utc> {
    last_dose
        .dosage_at
        .checked_add_signed(interval)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// True once `interval` has fully elapsed. The boundary itself counts as due.
pub fn is_due(last_dose: &DoseEvent, interval: Duration, now: DateTime<Utc>) -> bool {
    now >= next_due_time(last_dose, interval)
}

/// Time left until due; negative when overdue.
pub fn time_until_due(last_dose: &DoseEvent, interval: Duration, now: DateTime<Utc>) -> Duration {
    next_due_time(last_dose, interval) - now
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dosewatch_core::TreatmentType;

    fn dose_at(t: DateTime<Utc>) -> DoseEvent {
        DoseEvent {
            treatment_type: TreatmentType::Patches,
            dosage_at: t,
            notified_at: None,
        }
    }

    #[test]
    fn test_due_boundary_is_inclusive() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let interval = Duration::hours(24);
        let dose = dose_at(t);

        assert!(is_due(&dose, interval, t + interval));
        assert!(!is_due(&dose, interval, t + interval - Duration::seconds(1)));
        assert!(!is_due(&dose, interval, t + interval - Duration::microseconds(1)));
        assert!(is_due(&dose, interval, t + interval + Duration::days(3)));
    }

    #[test]
    fn test_next_due_time() {
        let t = Utc.with_ymd_and_hms(2024, 3, 10, 6, 30, 0).unwrap();
        let next = next_due_time(&dose_at(t), Duration::days(7));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 17, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_huge_interval_saturates() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let dose = dose_at(t);
        let interval = Duration::weeks(14_000_000);

        assert_eq!(next_due_time(&dose, interval), DateTime::<Utc>::MAX_UTC);
        assert!(!is_due(&dose, interval, Utc::now()));
        assert!(time_until_due(&dose, interval, Utc::now()) > Duration::zero());
    }

    #[test]
    fn test_time_until_due_sign() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let dose = dose_at(t);
        let interval = Duration::hours(2);
        assert_eq!(time_until_due(&dose, interval, t + Duration::hours(1)), Duration::hours(1));
        assert_eq!(time_until_due(&dose, interval, t + Duration::hours(3)), Duration::hours(-1));
    }
}
