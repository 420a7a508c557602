//! Timestamp encoding for the store.
//!
//! All times are persisted as `INTEGER` columns holding Unix epoch
//! milliseconds in UTC.

use chrono::{DateTime, TimeZone, Utc};

/// Current time in the store encoding.
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Encode a `DateTime<Utc>` for persistence.
#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Decode a persisted timestamp.
///
/// Out-of-range values (corrupt rows, manual edits) fall back to the
/// current time rather than panicking.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let now = Utc::now();
        let back = ms_to_datetime(datetime_to_ms(now));
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
