//! SQLite-backed crawl job queue.
//!
//! The queue shares the store's database, making it the single
//! synchronization point between the control plane and the workers.
//! Delivery is at-least-once: a popped job stays in the table as INFLIGHT
//! until acked, and a nack requeues it with exponential backoff.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::repositories::{CrawlJob, JobQueue};

/// Backoff ceiling for requeued jobs.
const MAX_BACKOFF_SECS: i64 = 300;

#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn backoff_secs(attempts: i64) -> i64 {
    (1i64 << attempts.clamp(0, 8)).min(MAX_BACKOFF_SECS)
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn push(&self, job_id: &str, project_id: &str) -> Result<()> {
        let now = Utc::now();
        // The primary key on job_id makes duplicate pushes a no-op.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO crawl_jobs
            (job_id, project_id, state, attempts, available_at, created_at)
            VALUES (?, ?, 'QUEUED', 0, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(project_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<CrawlJob>> {
        // Single-statement claim: oldest available job flips to INFLIGHT.
        let row = sqlx::query(
            r#"
            UPDATE crawl_jobs SET state = 'INFLIGHT'
            WHERE job_id = (
                SELECT job_id FROM crawl_jobs
                WHERE state = 'QUEUED' AND available_at <= ?
                ORDER BY created_at
                LIMIT 1
            )
            RETURNING job_id, project_id, attempts
            "#,
        )
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CrawlJob {
            job_id: row.get("job_id"),
            project_id: row.get("project_id"),
            attempts: row.get::<i64, _>("attempts") as u32,
        }))
    }

    async fn ack(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM crawl_jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, job_id: &str) -> Result<()> {
        let attempts: Option<i64> =
            sqlx::query_scalar("SELECT attempts FROM crawl_jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(attempts) = attempts else {
            return Ok(());
        };

        let delay = backoff_secs(attempts);
        let available_at = Utc::now() + Duration::seconds(delay);
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET state = 'QUEUED', attempts = attempts + 1, available_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(available_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        debug!(job_id, attempts = attempts + 1, delay_secs = delay, "job requeued");
        Ok(())
    }
}
