//! `call_queue` table access (spec.md §3, §4.2, §4.6). Claim protocol is a
//! two-statement SELECT-then-UPDATE-by-id form, sufficient for a
//! single-worker deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct CallQueueEntry {
    pub id: i64,
    pub contact_id: String,
    pub phone_number: String,
    pub first_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub service: String,
    pub province: Option<String>,
    pub retry_stage: i64,
    pub status: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub call_options_blob: Option<String>,
    pub available_slots_text: Option<String>,
    pub initial_signed_url: Option<String>,
    pub first_attempt_timestamp: DateTime<Utc>,
}

/// Fields needed to insert a new unit of work; `id`/`created_at` are
/// assigned by the database/caller.
#[derive(Clone, Debug)]
pub struct NewQueueEntry {
    pub contact_id: String,
    pub phone_number: String,
    pub first_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub service: String,
    pub province: Option<String>,
    pub retry_stage: i64,
    pub scheduled_at: DateTime<Utc>,
    pub call_options_blob: Option<String>,
    pub available_slots_text: Option<String>,
    pub initial_signed_url: Option<String>,
    pub first_attempt_timestamp: DateTime<Utc>,
}

pub async fn insert(pool: &SqlitePool, entry: NewQueueEntry) -> Result<i64, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"INSERT INTO call_queue
            (contact_id, phone_number, first_name, full_name, email, service, province,
             retry_stage, status, scheduled_at, created_at, call_options_blob,
             available_slots_text, initial_signed_url, first_attempt_timestamp)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(entry.contact_id)
    .bind(entry.phone_number)
    .bind(entry.first_name)
    .bind(entry.full_name)
    .bind(entry.email)
    .bind(entry.service)
    .bind(entry.province)
    .bind(entry.retry_stage)
    .bind(entry.scheduled_at)
    .bind(now)
    .bind(entry.call_options_blob)
    .bind(entry.available_slots_text)
    .bind(entry.initial_signed_url)
    .bind(entry.first_attempt_timestamp)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Atomically moves up to `limit` due `pending` rows to `processing`,
/// stamping `last_attempt_at`, and returns them. Two statements (SELECT then
/// UPDATE by id) — correct for a single worker; a multi-worker deployment
/// would need `SELECT ... FOR UPDATE SKIP LOCKED`.
pub async fn claim_due(
    pool: &SqlitePool,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<Vec<CallQueueEntry>, sqlx::Error> {
    let candidates: Vec<CallQueueEntry> = sqlx::query_as(
        r#"SELECT * FROM call_queue
           WHERE status = 'pending' AND scheduled_at <= ?
           ORDER BY scheduled_at ASC
           LIMIT ?"#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut claimed = Vec::with_capacity(candidates.len());
    for mut entry in candidates {
        let updated = sqlx::query(
            r#"UPDATE call_queue SET status = 'processing', last_attempt_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(now)
        .bind(entry.id)
        .execute(pool)
        .await?;

        if updated.rows_affected() == 1 {
            entry.status = "processing".to_string();
            entry.last_attempt_at = Some(now);
            claimed.push(entry);
        }
    }
    Ok(claimed)
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM call_queue WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, id: i64, last_error: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE call_queue SET status = 'failed', last_error = ? WHERE id = ?")
        .bind(last_error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
