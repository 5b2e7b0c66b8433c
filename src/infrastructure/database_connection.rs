//! SQLite connection pool and schema management.

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool};
use tracing::info;

const SCHEMA_SQL: &str = include_str!("../../migrations/001_initial_schema.sql");

#[derive(Clone)]
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("failed to open database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema. Idempotent: every statement is
    /// CREATE IF NOT EXISTS.
    pub async fn migrate(&self) -> Result<()> {
        self.pool
            .execute(SCHEMA_SQL)
            .await
            .context("schema migration failed")?;
        info!("database schema applied");
        Ok(())
    }
}
