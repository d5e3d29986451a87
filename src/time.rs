//! Italian civil time <-> UTC conversion and business-hours predicates
//! (spec.md §4.1). Storage is always UTC; civil wall-clock arithmetic is
//! done against `Europe/Rome` via `chrono-tz`.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Europe::Rome;

/// Converts a civil Italian (date, time) pair to the UTC instant it
/// denotes, resolving DST ambiguity per spec.md §4.1 / SPEC_FULL §4.1:
/// on the autumn fold-back (two valid instants) the earlier one is chosen;
/// on the spring gap (no valid instant) the time is shifted forward by the
/// gap, matching `chrono`'s own `LocalResult::single()` fallback behavior.
pub fn italian_to_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match Rome.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _later) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            // Spring-forward gap: step forward an hour and retry once.
            let shifted = naive + Duration::hours(1);
            match Rome.from_local_datetime(&shifted) {
                LocalResult::Single(dt) => dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
                LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}

/// The inverse of `italian_to_utc`: the civil (date, time) an instant
/// denotes in Europe/Rome.
pub fn utc_to_italian(instant: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
    let local = instant.with_timezone(&Rome);
    (local.date_naive(), local.time())
}

/// True iff `now`'s Europe/Rome hour-of-day is in `[08:00, 20:00)`
/// (spec.md §4.1 `is_operating_hours`).
pub fn is_operating_hours(now: DateTime<Utc>) -> bool {
    let hour = now.with_timezone(&Rome).hour();
    (8..20).contains(&hour)
}

/// True iff `instant`'s Europe/Rome hour-of-day is in `[09:00, 20:00)`
/// (spec.md §4.1 `is_within_italian_business`).
pub fn is_within_italian_business(instant: DateTime<Utc>) -> bool {
    let hour = instant.with_timezone(&Rome).hour();
    (9..20).contains(&hour)
}

/// Adds one calendar day (UTC) then skips Saturday/Sunday, also by UTC
/// weekday. This is a documented approximation (spec.md §9 Open Question):
/// near midnight Europe/Rome the UTC day-of-week can differ from the civil
/// one, so this can occasionally misclassify the boundary. Kept as-is
/// rather than "fixed" because downstream retry timing already depends on
/// the current behavior.
pub fn next_valid_workday(d: DateTime<Utc>) -> DateTime<Utc> {
    let mut next = d + Duration::days(1);
    loop {
        match next.weekday() {
            Weekday::Sat | Weekday::Sun => next += Duration::days(1),
            _ => return next,
        }
    }
}

/// Returns the next Europe/Rome instant at `hour:00` strictly after `now`.
/// Used by the Retry Scheduler's fixed-hour slots (09:00/14:00/19:00).
pub fn next_italian_clock_hour(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let (today, _) = utc_to_italian(now);
    let candidate_time = NaiveTime::from_hms_opt(hour, 0, 0).expect("valid hour");
    let candidate = italian_to_utc(today, candidate_time);
    if candidate > now {
        candidate
    } else {
        italian_to_utc(today + Duration::days(1), candidate_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn round_trips_away_from_dst_transitions() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let time = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        let utc = italian_to_utc(date, time);
        let (d2, t2) = utc_to_italian(utc);
        assert_eq!((date, time), (d2, t2));
    }

    #[test]
    fn operating_hours_boundary() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let morning = italian_to_utc(date, NaiveTime::from_hms_opt(7, 59, 0).unwrap());
        let open = italian_to_utc(date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let close = italian_to_utc(date, NaiveTime::from_hms_opt(20, 0, 0).unwrap());
        assert!(!is_operating_hours(morning));
        assert!(is_operating_hours(open));
        assert!(!is_operating_hours(close));
    }

    #[test]
    fn next_valid_workday_skips_weekend() {
        // Friday 2025-06-13 -> should land on Monday 2025-06-16
        let friday = Utc.with_ymd_and_hms(2025, 6, 13, 10, 0, 0).unwrap();
        let next = next_valid_workday(friday);
        assert_eq!(next.weekday(), Weekday::Mon);
    }
}
