//! Ledger day-key handling.
//!
//! Price points are bucketed by calendar day in a fixed market timezone
//! (KST, UTC+9) so that "today's price" means the same thing regardless of
//! where a job runs. Day keys are `YYYY-MM-DD` strings; legacy records may
//! carry full RFC 3339 timestamps as keys instead.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// Ledger timezone offset in hours east of UTC.
pub const LEDGER_TZ_HOURS: i32 = 9;

/// The fixed ledger timezone.
pub fn ledger_tz() -> FixedOffset {
    FixedOffset::east_opt(LEDGER_TZ_HOURS * 3600).expect("ledger timezone offset is valid")
}

/// Day key for the given instant, in the ledger timezone.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.with_timezone(&ledger_tz()).format("%Y-%m-%d").to_string()
}

/// Parse a ledger day key back into an instant (midnight in the ledger
/// timezone). Accepts plain `YYYY-MM-DD` keys and legacy RFC 3339 keys.
pub fn parse_day_key(key: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = NaiveDate::parse_from_str(key, "%Y-%m-%d") {
        let midnight = d.and_time(NaiveTime::MIN);
        return ledger_tz()
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(key)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_key_uses_ledger_timezone() {
        // 2025-10-01 20:00 UTC is already 2025-10-02 in KST.
        let t = Utc.with_ymd_and_hms(2025, 10, 1, 20, 0, 0).unwrap();
        assert_eq!(day_key(t), "2025-10-02");
    }

    #[test]
    fn parse_roundtrips_plain_keys() {
        let parsed = parse_day_key("2025-09-05").unwrap();
        assert_eq!(day_key(parsed), "2025-09-05");
    }

    #[test]
    fn parse_accepts_legacy_rfc3339_keys() {
        let parsed = parse_day_key("2025-09-01T00:00:00.000Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_day_key("not-a-date").is_none());
    }
}
