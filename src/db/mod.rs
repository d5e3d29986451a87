//! Embedded relational store (spec.md §4.2). One `SqlitePool` is shared by
//! the whole process; individual operations borrow a connection for the
//! length of a single query rather than holding a transaction open across
//! awaited external calls.

pub mod calls;
pub mod crm_tokens;
pub mod follow_ups;
pub mod incoming_calls;
pub mod migrations;
pub mod queue;
pub mod sales_reps;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub async fn connect(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let url = format!("sqlite://{database_path}?mode=rwc");
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    migrations::run(&pool).await?;
    Ok(pool)
}
