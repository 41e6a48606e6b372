//! Time and timestamp helpers.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// UTC timestamp used for enrollment scheduling, log records, event times, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time, truncated to microsecond precision.
///
/// Persisted timestamps carry microseconds, so truncating here keeps a value
/// equal to itself after a storage round-trip.
#[must_use]
pub fn now() -> Timestamp {
    truncate(Utc::now())
}

/// Truncate a timestamp to microsecond precision.
#[must_use]
pub fn truncate(ts: Timestamp) -> Timestamp {
    ts.duration_trunc(TimeDelta::microseconds(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{SubsecRound, Timelike};

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now().trunc_subsecs(6);
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_drop_sub_microsecond_precision() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let truncated = truncate(ts);
        assert_eq!(truncated.nanosecond(), 123_456_000);
    }
}
