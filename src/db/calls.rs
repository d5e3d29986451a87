//! `calls` table access (spec.md §3, §4.6-§4.10). A `CallRecord` row is
//! never deleted — it is the call's audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct CallRecord {
    pub call_sid: String,
    #[sqlx(rename = "to")]
    pub to: String,
    pub contact_id: Option<String>,
    pub retry_count: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub signed_url: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub answered_by: Option<String>,
    pub available_slots: Option<String>,
    pub conversation_id: Option<String>,
    pub first_attempt_timestamp: Option<DateTime<Utc>>,
    pub service: Option<String>,
    pub retry_scheduled: bool,
    pub province: Option<String>,
    pub stream_sid: Option<String>,
    pub transcript_summary: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewCallRecord {
    pub call_sid: String,
    pub to: String,
    pub contact_id: Option<String>,
    pub retry_count: i64,
    pub status: String,
    pub signed_url: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub available_slots: Option<String>,
    pub first_attempt_timestamp: Option<DateTime<Utc>>,
    pub service: Option<String>,
    pub province: Option<String>,
}

/// Writes the `CallRecord` row. MUST be called before the telephony status
/// callback for this sid can be processed (ordering invariant, spec.md §5).
pub async fn insert(pool: &SqlitePool, rec: NewCallRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO calls
            (call_sid, "to", contact_id, retry_count, status, created_at, signed_url,
             full_name, first_name, email, available_slots, first_attempt_timestamp,
             service, retry_scheduled, province)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
    )
    .bind(rec.call_sid)
    .bind(rec.to)
    .bind(rec.contact_id)
    .bind(rec.retry_count)
    .bind(rec.status)
    .bind(Utc::now())
    .bind(rec.signed_url)
    .bind(rec.full_name)
    .bind(rec.first_name)
    .bind(rec.email)
    .bind(rec.available_slots)
    .bind(rec.first_attempt_timestamp)
    .bind(rec.service)
    .bind(rec.province)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find(pool: &SqlitePool, call_sid: &str) -> Result<Option<CallRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM calls WHERE call_sid = ?")
        .bind(call_sid)
        .fetch_optional(pool)
        .await
}

pub async fn set_status(pool: &SqlitePool, call_sid: &str, status: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE calls SET status = ? WHERE call_sid = ?")
        .bind(status)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_answered_by(
    pool: &SqlitePool,
    call_sid: &str,
    answered_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE calls SET answered_by = ? WHERE call_sid = ?")
        .bind(answered_by)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_stream_sid(pool: &SqlitePool, call_sid: &str, stream_sid: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE calls SET stream_sid = ? WHERE call_sid = ?")
        .bind(stream_sid)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_conversation_id(
    pool: &SqlitePool,
    call_sid: &str,
    conversation_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE calls SET conversation_id = ? WHERE call_sid = ?")
        .bind(conversation_id)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_transcript_summary(
    pool: &SqlitePool,
    call_sid: &str,
    summary: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE calls SET transcript_summary = ? WHERE call_sid = ?")
        .bind(summary)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

/// Atomically sets the `retry_scheduled` latch. Returns `true` if this call
/// won the race (the caller should proceed to schedule a retry); `false` if
/// another callback already claimed it (spec.md §4.7, §8: at most one retry
/// is ever scheduled per call).
pub async fn try_set_retry_scheduled(pool: &SqlitePool, call_sid: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE calls SET retry_scheduled = 1 WHERE call_sid = ? AND retry_scheduled = 0",
    )
    .bind(call_sid)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn most_recent_province_for_contact(
    pool: &SqlitePool,
    contact_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(Option<String>,)> = sqlx::query_as(
        r#"SELECT province FROM calls WHERE contact_id = ? AND province IS NOT NULL
           ORDER BY created_at DESC LIMIT 1"#,
    )
    .bind(contact_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.and_then(|(p,)| p))
}
