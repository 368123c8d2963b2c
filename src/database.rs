use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!();

pub async fn setup_database(database_url: &str, max_connections: u32) -> Result<PgPool> {
  let pool = PgPoolOptions::new()
    .max_connections(max_connections)
    .connect(database_url)
    .await
    .context("Failed to connect to database")?;

  MIGRATOR.run(&pool)
    .await
    .context("Failed to run database migrations")?;
  info!("Database migrations complete");
  Ok(pool)
}
