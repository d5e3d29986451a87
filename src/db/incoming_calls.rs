//! `incoming_calls` table access (spec.md §3, §4.12). The inbound mirror of
//! `calls`; identical lifecycle, keyed on its own call sid.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct IncomingCall {
    pub call_sid: String,
    pub caller_number: String,
    pub status: String,
    pub signed_url: Option<String>,
    pub available_slots: Option<String>,
    pub conversation_id: Option<String>,
    pub stream_sid: Option<String>,
}

pub async fn insert(
    pool: &SqlitePool,
    call_sid: &str,
    caller_number: &str,
    signed_url: Option<&str>,
    available_slots: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO incoming_calls (call_sid, caller_number, status, created_at, signed_url, available_slots)
           VALUES (?, ?, 'ringing', ?, ?, ?)"#,
    )
    .bind(call_sid)
    .bind(caller_number)
    .bind(Utc::now())
    .bind(signed_url)
    .bind(available_slots)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_stream_sid(pool: &SqlitePool, call_sid: &str, stream_sid: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE incoming_calls SET stream_sid = ? WHERE call_sid = ?")
        .bind(stream_sid)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_status(pool: &SqlitePool, call_sid: &str, status: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE incoming_calls SET status = ? WHERE call_sid = ?")
        .bind(status)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_conversation_id(pool: &SqlitePool, call_sid: &str, conversation_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE incoming_calls SET conversation_id = ? WHERE call_sid = ?")
        .bind(conversation_id)
        .bind(call_sid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find(pool: &SqlitePool, call_sid: &str) -> Result<Option<IncomingCall>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM incoming_calls WHERE call_sid = ?")
        .bind(call_sid)
        .fetch_optional(pool)
        .await
}
