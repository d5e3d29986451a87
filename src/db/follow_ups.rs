//! `follow_ups` table access (spec.md §3, §4.11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct FollowUp {
    pub id: i64,
    pub contact_id: String,
    pub follow_up_at_utc: DateTime<Utc>,
    pub status: String,
    pub province: Option<String>,
    pub service: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

pub async fn insert(
    pool: &SqlitePool,
    contact_id: &str,
    follow_up_at_utc: DateTime<Utc>,
    province: Option<&str>,
    service: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO follow_ups (contact_id, follow_up_at_utc, status, province, service, created_at)
           VALUES (?, ?, 'pending', ?, ?, ?)"#,
    )
    .bind(contact_id)
    .bind(follow_up_at_utc)
    .bind(province)
    .bind(service)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn due(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<FollowUp>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM follow_ups WHERE status = 'pending' AND follow_up_at_utc <= ?")
        .bind(now)
        .fetch_all(pool)
        .await
}

/// Stuck entries: pending for more than 24h past due, or pending with any
/// recorded failure older than 1h (spec.md §4.11 step 1).
pub async fn stuck(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<FollowUp>, sqlx::Error> {
    let stale_due = now - chrono::Duration::hours(24);
    let stale_failure = now - chrono::Duration::hours(1);
    sqlx::query_as(
        r#"SELECT * FROM follow_ups
           WHERE status = 'pending'
             AND (follow_up_at_utc < ? OR (last_failure_at IS NOT NULL AND last_failure_at < ?))"#,
    )
    .bind(stale_due)
    .bind(stale_failure)
    .fetch_all(pool)
    .await
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM follow_ups WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn record_failure(pool: &SqlitePool, id: i64, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE follow_ups SET last_failure_at = ? WHERE id = ?")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
