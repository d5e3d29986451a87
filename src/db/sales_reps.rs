//! `sales_reps` table access (spec.md §3, §4.3). `services`/`provinces` are
//! stored as comma-separated text — sqlite has no array column and the set
//! is small and append-only in practice.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct SalesRepRow {
    pub id: i64,
    pub ghl_user_id: String,
    pub name: String,
    pub services: String,
    pub provinces: String,
    pub active: bool,
}

impl SalesRepRow {
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.split(',').map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn provinces(&self) -> impl Iterator<Item = &str> {
        self.provinces.split(',').map(str::trim).filter(|s| !s.is_empty())
    }
}

pub async fn active_reps(pool: &SqlitePool) -> Result<Vec<SalesRepRow>, sqlx::Error> {
    sqlx::query_as("SELECT id, ghl_user_id, name, services, provinces, active FROM sales_reps WHERE active = 1")
        .fetch_all(pool)
        .await
}

pub async fn upsert(
    pool: &SqlitePool,
    ghl_user_id: &str,
    name: &str,
    services: &str,
    provinces: &str,
    active: bool,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO sales_reps (ghl_user_id, name, services, provinces, active, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(ghl_user_id) DO UPDATE SET
             name = excluded.name,
             services = excluded.services,
             provinces = excluded.provinces,
             active = excluded.active,
             updated_at = excluded.updated_at"#,
    )
    .bind(ghl_user_id)
    .bind(name)
    .bind(services)
    .bind(provinces)
    .bind(active)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
