//! Embedded schema for chats, memberships and messages.

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::info;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Bring the relay schema up to date. Already-applied steps are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply relay schema")?;
    info!(steps = MIGRATOR.iter().count(), "relay schema is current");
    Ok(())
}
