//! `crm_tokens` table access (spec.md §3). Per-location OAuth state; the
//! core treats the refresh mechanics as a black box and only asks "give me
//! a valid bearer" (see `crm::CrmClient::bearer_for`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct CrmToken {
    pub location_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn find(pool: &SqlitePool, location_id: &str) -> Result<Option<CrmToken>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM crm_tokens WHERE location_id = ?")
        .bind(location_id)
        .fetch_optional(pool)
        .await
}

pub async fn upsert(
    pool: &SqlitePool,
    location_id: &str,
    access_token: &str,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO crm_tokens (location_id, access_token, refresh_token, expires_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(location_id) DO UPDATE SET
             access_token = excluded.access_token,
             refresh_token = excluded.refresh_token,
             expires_at = excluded.expires_at"#,
    )
    .bind(location_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}
