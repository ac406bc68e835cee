use std::time::Duration;

use anyhow::Context;
use sqlx::{Pool, Postgres};

pub type PgPool = Pool<Postgres>;

pub async fn connect_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("postgres_connect")?;
    tracing::info!(max_connections, "postgres_pool_ready");
    Ok(pool)
}

/// Applies the embedded schema migrations from `./migrations`.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("postgres_migrate")?;
    Ok(())
}

pub mod repositories;
