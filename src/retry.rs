//! Retry Scheduler (spec.md §4.7): consumes telephony status callbacks,
//! classifies outcomes, and re-enqueues retryable ones against the fixed
//! 10-step schedule.

use crate::db::calls::{self, CallRecord};
use crate::db::queue::{self, NewQueueEntry};
use crate::notifier::{Notification, Severity};
use crate::telephony::{is_machine_token, CallStatus};
use crate::time::next_italian_clock_hour;
use crate::AppState;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "AnsweredBy")]
    pub answered_by: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Human,
    Retryable,
    Ignore,
}

fn classify(status: Option<CallStatus>, answered_by: Option<&str>) -> Outcome {
    let machine_detected = answered_by.map(is_machine_token).unwrap_or(false);
    match status {
        Some(CallStatus::Completed) | Some(CallStatus::Canceled) if machine_detected => Outcome::Retryable,
        Some(CallStatus::Completed) => Outcome::Human,
        Some(CallStatus::NoAnswer) | Some(CallStatus::Busy) | Some(CallStatus::Failed) => Outcome::Retryable,
        _ if machine_detected => Outcome::Retryable,
        _ => Outcome::Ignore,
    }
}

/// Retry schedule per spec.md §4.7: `next_attempt_index` is 1-based
/// (`retry_count + 1`). Index 10 schedules nothing further.
fn next_schedule(next_index: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match next_index {
        1 | 3 | 5 | 7 | 9 => Some(now),
        2 => Some(now + Duration::hours(1)),
        4 => Some(next_italian_clock_hour(now, 9)),
        6 => Some(next_italian_clock_hour(now, 14)),
        8 => Some(next_italian_clock_hour(now, 19)),
        _ => None,
    }
}

/// Processes one status callback. Always returns `Ok(())` — the HTTP layer
/// responds 200 regardless of outcome (spec.md §6).
pub async fn handle_status_callback(state: &AppState, cb: StatusCallback) -> Result<(), sqlx::Error> {
    let record = match calls::find(&state.pool, &cb.call_sid).await? {
        Some(r) => r,
        None => {
            tracing::warn!(call_sid = %cb.call_sid, "retry scheduler: status callback for unknown call_sid");
            return Ok(());
        }
    };

    let status = CallStatus::parse(&cb.call_status);
    let outcome = classify(status, cb.answered_by.as_deref());

    calls::set_status(&state.pool, &cb.call_sid, &cb.call_status).await?;
    if let Some(answered_by) = &cb.answered_by {
        calls::set_answered_by(&state.pool, &cb.call_sid, answered_by).await?;
    }

    match outcome {
        Outcome::Human | Outcome::Ignore => Ok(()),
        Outcome::Retryable => schedule_retry(state, &record, &cb).await,
    }
}

async fn schedule_retry(state: &AppState, record: &CallRecord, cb: &StatusCallback) -> Result<(), sqlx::Error> {
    let machine_detected = cb.answered_by.as_deref().map(is_machine_token).unwrap_or(false);
    let status_is_live = matches!(CallStatus::parse(&cb.call_status), Some(s) if s.is_active());
    if machine_detected && status_is_live {
        if let Err(e) = state.telephony.hangup(&record.call_sid).await {
            tracing::warn!(error = %e, call_sid = %record.call_sid, "retry scheduler: hangup failed");
        }
    }

    // Latch: at most one retry is ever scheduled per call (§8 testable property).
    if !calls::try_set_retry_scheduled(&state.pool, &record.call_sid).await? {
        return Ok(());
    }

    let next_index = (record.retry_count + 1) as u32;

    if record.province.as_deref() == Some("unknown") && record.retry_count >= 1 {
        permanent_failure(state, record, "province unresolved after repeated attempts").await;
        return Ok(());
    }

    let scheduled_at = match next_schedule(next_index, Utc::now()) {
        Some(at) => at,
        None => {
            permanent_failure(state, record, "retry schedule exhausted (10 attempts)").await;
            return Ok(());
        }
    };

    let entry = NewQueueEntry {
        contact_id: record.contact_id.clone().unwrap_or_default(),
        phone_number: record.to.clone(),
        first_name: record.first_name.clone(),
        full_name: record.full_name.clone(),
        email: record.email.clone(),
        service: record.service.clone().unwrap_or_default(),
        province: record.province.clone(),
        retry_stage: next_index as i64,
        scheduled_at,
        call_options_blob: None,
        available_slots_text: record.available_slots.clone(),
        initial_signed_url: record.signed_url.clone(),
        first_attempt_timestamp: record.first_attempt_timestamp.unwrap_or_else(Utc::now),
    };
    queue::insert(&state.pool, entry).await?;
    Ok(())
}

async fn permanent_failure(state: &AppState, record: &CallRecord, reason: &str) {
    state
        .notifier
        .notify(
            Severity::Normal,
            &format!("retry scheduler: permanent failure — {reason}"),
            Notification {
                contact_id: record.contact_id.clone(),
                phone: Some(record.to.clone()),
                service: record.service.clone(),
                province: record.province.clone(),
                ..Default::default()
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_detection_on_completed_call_is_retryable() {
        assert_eq!(classify(Some(CallStatus::Completed), Some("machine_start")), Outcome::Retryable);
    }

    #[test]
    fn human_completion_is_terminal() {
        assert_eq!(classify(Some(CallStatus::Completed), Some("human")), Outcome::Human);
    }

    #[test]
    fn no_answer_busy_failed_are_retryable() {
        assert_eq!(classify(Some(CallStatus::NoAnswer), None), Outcome::Retryable);
        assert_eq!(classify(Some(CallStatus::Busy), None), Outcome::Retryable);
        assert_eq!(classify(Some(CallStatus::Failed), None), Outcome::Retryable);
    }

    #[test]
    fn schedule_matches_the_fixed_ten_step_table() {
        let now = Utc::now();
        assert_eq!(next_schedule(1, now), Some(now));
        assert_eq!(next_schedule(2, now), Some(now + Duration::hours(1)));
        assert_eq!(next_schedule(3, now), Some(now));
        assert_eq!(next_schedule(10, now), None);
    }
}
