//! Booking Coordinator (spec.md §4.9): normalizes a requested appointment
//! time, books via the CRM, and on failure offers alternatives from the
//! next two available days within a 7-day window.

use crate::crm::{CrmClient, SlotsOutcome};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error("appointmentDate could not be parsed; expected DD-MM-YYYY HH:mm or YYYY-MM-DD HH:mm")]
    MalformedDate,
    #[error(transparent)]
    Crm(#[from] crate::crm::CrmError),
}

#[derive(Debug)]
pub enum BookingResult {
    Booked(serde_json::Value),
    FailedWithAlternatives(Vec<DateTime<Utc>>),
    FailedNoAlternatives,
}

/// Accepts either `DD-MM-YYYY HH:mm` or `YYYY-MM-DD HH:mm`, both interpreted
/// as Europe/Rome civil time (spec.md §4.9).
pub fn parse_appointment_date(raw: &str) -> Result<DateTime<Utc>, BookingError> {
    for fmt in ["%d-%m-%Y %H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(crate::time::italian_to_utc(naive.date(), naive.time()));
        }
    }
    Err(BookingError::MalformedDate)
}

pub async fn book(
    crm: &CrmClient,
    contact_id: &str,
    start_time_utc: DateTime<Utc>,
    address: &str,
    user_id: Option<&str>,
) -> Result<BookingResult, BookingError> {
    match crm.book_appointment(contact_id, start_time_utc, address, user_id).await {
        Ok(body) => Ok(BookingResult::Booked(body)),
        Err(_) => find_alternatives(crm, start_time_utc, user_id).await,
    }
}

async fn find_alternatives(
    crm: &CrmClient,
    failed_time: DateTime<Utc>,
    user_id: Option<&str>,
) -> Result<BookingResult, BookingError> {
    let window_start = Utc
        .with_ymd_and_hms(failed_time.year(), failed_time.month(), failed_time.day(), 0, 0, 0)
        .single()
        .unwrap_or(failed_time);
    let window_end = window_start + chrono::Duration::days(7);

    let rep_ids: Vec<String> = user_id.map(|u| vec![u.to_string()]).unwrap_or_default();
    let outcome = crm.free_slots(&rep_ids, window_start, window_end).await?;

    let mut slots = match outcome {
        SlotsOutcome::Slots(s) => s.into_iter().map(|s| s.datetime_utc).collect::<Vec<_>>(),
        SlotsOutcome::Empty | SlotsOutcome::ApiError(_) => Vec::new(),
    };
    slots.retain(|&t| t >= failed_time);
    slots.sort();

    // Group by UTC date, keep all slots from the first two distinct dates.
    let mut dates_seen = Vec::new();
    let mut alternatives = Vec::new();
    for slot in slots {
        let date = slot.date_naive();
        if !dates_seen.contains(&date) {
            if dates_seen.len() == 2 {
                break;
            }
            dates_seen.push(date);
        }
        alternatives.push(slot);
    }

    if alternatives.is_empty() {
        Ok(BookingResult::FailedNoAlternatives)
    } else {
        Ok(BookingResult::FailedWithAlternatives(alternatives))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_supported_date_formats() {
        assert!(parse_appointment_date("17-03-2025 10:00").is_ok());
        assert!(parse_appointment_date("2025-03-17 10:00").is_ok());
        assert!(parse_appointment_date("not a date").is_err());
    }
}
