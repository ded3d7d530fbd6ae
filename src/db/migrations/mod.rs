use anyhow::Result;
use sqlx::{Executor, SqlitePool};
use tracing::info;

use crate::error::Error;

/// Migrations compiled into the binary, applied in order.
/// Every script must be safe to re-run against an initialized database.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_create_events.sql",
    include_str!("sql/001_create_events.sql"),
)];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        execute_migration(pool, name, sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}

async fn execute_migration(pool: &SqlitePool, name: &str, sql: &str) -> Result<()> {
    pool.execute(sql)
        .await
        .map_err(|e| Error::Database(format!("Migration {} failed: {}", name, e)))?;

    Ok(())
}
