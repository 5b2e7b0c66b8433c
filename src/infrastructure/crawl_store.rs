//! sqlx-backed implementation of the `CrawlStore` seam.
//!
//! All child-row writes are scoped by `crawl_run_id`. A page and its
//! issues commit in one transaction; bulk writes are chunked to keep
//! statements bounded.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, SqlitePool};

use crate::domain::entities::{
    CrawlRun, CrawlRunStatus, Issue, Link, Page, Project, RedirectHop, Template,
};
use crate::domain::repositories::CrawlStore;
use crate::domain::totals::CrawlTotals;

/// Upper bound on rows per bulk statement.
const BATCH_SIZE: usize = 100;

#[derive(Clone)]
pub struct SqliteCrawlStore {
    pool: SqlitePool,
}

impl SqliteCrawlStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_project(row: SqliteRow) -> Result<Project> {
    Ok(Project {
        id: row.get("id"),
        name: row.get("name"),
        start_url: row.get("start_url"),
        domain: row.get("domain"),
        settings: serde_json::from_str(row.get::<String, _>("settings").as_str())
            .unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at"),
    })
}

fn row_to_run(row: SqliteRow) -> Result<CrawlRun> {
    let status: CrawlRunStatus = row.get("status");
    Ok(CrawlRun {
        id: row.get("id"),
        project_id: row.get("project_id"),
        status,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        settings_snapshot: serde_json::from_str(
            row.get::<String, _>("settings_snapshot").as_str(),
        )
        .unwrap_or(serde_json::Value::Null),
        totals: serde_json::from_str(row.get::<String, _>("totals").as_str())
            .unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at"),
    })
}

fn row_to_page(row: SqliteRow) -> Result<Page> {
    let redirect_chain: Vec<RedirectHop> =
        serde_json::from_str(row.get::<String, _>("redirect_chain").as_str()).unwrap_or_default();
    let template_signature = row
        .get::<Option<String>, _>("template_signature")
        .and_then(|s| serde_json::from_str(&s).ok());

    Ok(Page {
        id: row.get("id"),
        crawl_run_id: row.get("crawl_run_id"),
        url: row.get("url"),
        normalized_url: row.get("normalized_url"),
        status_code: row.get::<Option<i64>, _>("status_code").map(|v| v as u16),
        content_type: row.get("content_type"),
        title: row.get("title"),
        meta_description: row.get("meta_description"),
        h1_count: row.get::<i64, _>("h1_count") as u32,
        canonical: row.get("canonical"),
        robots_meta: row.get("robots_meta"),
        word_count: row.get::<Option<i64>, _>("word_count").map(|v| v as u32),
        redirect_chain,
        template_signature_hash: row.get("template_signature_hash"),
        template_signature,
        template_id: row.get("template_id"),
        fetch_error: row.get("fetch_error"),
        discovered_at: row.get("discovered_at"),
    })
}

fn row_to_link(row: SqliteRow) -> Result<Link> {
    Ok(Link {
        id: row.get("id"),
        crawl_run_id: row.get("crawl_run_id"),
        from_page_id: row.get("from_page_id"),
        to_url: row.get("to_url"),
        to_normalized_url: row.get("to_normalized_url"),
        link_type: row.get("link_type"),
        is_broken: row.get("is_broken"),
        status_code: row.get::<Option<i64>, _>("status_code").map(|v| v as u16),
    })
}

fn row_to_issue(row: SqliteRow) -> Result<Issue> {
    Ok(Issue {
        id: row.get("id"),
        crawl_run_id: row.get("crawl_run_id"),
        page_id: row.get("page_id"),
        issue_type: row.get("issue_type"),
        severity: row.get("severity"),
        title: row.get("title"),
        description: row.get("description"),
        recommendation: row.get("recommendation"),
        evidence: serde_json::from_str(row.get::<String, _>("evidence").as_str())
            .unwrap_or(serde_json::Value::Null),
    })
}

#[async_trait]
impl CrawlStore for SqliteCrawlStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, name, start_url, domain, settings, created_at FROM projects WHERE id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_project).transpose()
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<CrawlRun>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, status, started_at, finished_at,
                   settings_snapshot, totals, created_at
            FROM crawl_runs WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_run).transpose()
    }

    async fn read_run_status(&self, run_id: &str) -> Result<CrawlRunStatus> {
        let status: Option<CrawlRunStatus> =
            sqlx::query_scalar("SELECT status FROM crawl_runs WHERE id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
        match status {
            Some(status) => Ok(status),
            None => bail!("crawl run not found: {run_id}"),
        }
    }

    async fn update_run_status(&self, run_id: &str, status: CrawlRunStatus) -> Result<bool> {
        let now = Utc::now();
        // Terminal states are sinks; the WHERE clause refuses to move a run
        // out of one.
        let result = if status == CrawlRunStatus::Running {
            sqlx::query(
                r#"
                UPDATE crawl_runs SET status = ?, started_at = ?
                WHERE id = ? AND status NOT IN ('DONE', 'FAILED', 'CANCELED')
                "#,
            )
            .bind(status)
            .bind(now)
            .bind(run_id)
            .execute(&self.pool)
            .await?
        } else if status.is_terminal() {
            sqlx::query(
                r#"
                UPDATE crawl_runs SET status = ?, finished_at = ?
                WHERE id = ? AND status NOT IN ('DONE', 'FAILED', 'CANCELED')
                "#,
            )
            .bind(status)
            .bind(now)
            .bind(run_id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE crawl_runs SET status = ?
                WHERE id = ? AND status NOT IN ('DONE', 'FAILED', 'CANCELED')
                "#,
            )
            .bind(status)
            .bind(run_id)
            .execute(&self.pool)
            .await?
        };
        Ok(result.rows_affected() > 0)
    }

    async fn update_run_totals(&self, run_id: &str, totals: &CrawlTotals) -> Result<()> {
        let json = serde_json::to_string(totals).context("totals serialization failed")?;
        sqlx::query("UPDATE crawl_runs SET totals = ? WHERE id = ?")
            .bind(json)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn wipe_children(&self, run_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["issues", "links", "pages", "templates"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE crawl_run_id = ?"))
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn persist_page(&self, page: &Page, issues: &[Issue]) -> Result<()> {
        let redirect_chain =
            serde_json::to_string(&page.redirect_chain).context("redirect chain serialization")?;
        let template_signature = page
            .template_signature
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("template signature serialization")?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO pages
            (id, crawl_run_id, url, normalized_url, status_code, content_type,
             title, meta_description, h1_count, canonical, robots_meta, word_count,
             redirect_chain, template_signature_hash, template_signature,
             template_id, fetch_error, discovered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (crawl_run_id, normalized_url) DO NOTHING
            "#,
        )
        .bind(&page.id)
        .bind(&page.crawl_run_id)
        .bind(&page.url)
        .bind(&page.normalized_url)
        .bind(page.status_code.map(|v| v as i64))
        .bind(&page.content_type)
        .bind(&page.title)
        .bind(&page.meta_description)
        .bind(page.h1_count as i64)
        .bind(&page.canonical)
        .bind(&page.robots_meta)
        .bind(page.word_count.map(|v| v as i64))
        .bind(redirect_chain)
        .bind(&page.template_signature_hash)
        .bind(template_signature)
        .bind(&page.template_id)
        .bind(&page.fetch_error)
        .bind(page.discovered_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // First writer wins: a collision keeps the existing row and drops
        // the issues that would have pointed at ours.
        if inserted > 0 {
            for chunk in issues.chunks(BATCH_SIZE) {
                let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                    "INSERT INTO issues (id, crawl_run_id, page_id, issue_type, severity, \
                     title, description, recommendation, evidence) ",
                );
                builder.push_values(chunk, |mut b, issue| {
                    b.push_bind(&issue.id)
                        .push_bind(&issue.crawl_run_id)
                        .push_bind(&issue.page_id)
                        .push_bind(&issue.issue_type)
                        .push_bind(issue.severity)
                        .push_bind(&issue.title)
                        .push_bind(&issue.description)
                        .push_bind(&issue.recommendation)
                        .push_bind(issue.evidence.to_string());
                });
                builder.build().execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn persist_links(&self, links: &[Link]) -> Result<()> {
        if links.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for chunk in links.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO links (id, crawl_run_id, from_page_id, to_url, \
                 to_normalized_url, link_type, is_broken, status_code) ",
            );
            builder.push_values(chunk, |mut b, link| {
                b.push_bind(&link.id)
                    .push_bind(&link.crawl_run_id)
                    .push_bind(&link.from_page_id)
                    .push_bind(&link.to_url)
                    .push_bind(&link.to_normalized_url)
                    .push_bind(link.link_type)
                    .push_bind(link.is_broken)
                    .push_bind(link.status_code.map(|v| v as i64));
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn persist_issues(&self, issues: &[Issue]) -> Result<()> {
        if issues.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for chunk in issues.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO issues (id, crawl_run_id, page_id, issue_type, severity, \
                 title, description, recommendation, evidence) ",
            );
            builder.push_values(chunk, |mut b, issue| {
                b.push_bind(&issue.id)
                    .push_bind(&issue.crawl_run_id)
                    .push_bind(&issue.page_id)
                    .push_bind(&issue.issue_type)
                    .push_bind(issue.severity)
                    .push_bind(&issue.title)
                    .push_bind(&issue.description)
                    .push_bind(&issue.recommendation)
                    .push_bind(issue.evidence.to_string());
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_pages(&self, run_id: &str) -> Result<Vec<Page>> {
        let rows = sqlx::query(
            r#"
            SELECT id, crawl_run_id, url, normalized_url, status_code, content_type,
                   title, meta_description, h1_count, canonical, robots_meta, word_count,
                   redirect_chain, template_signature_hash, template_signature,
                   template_id, fetch_error, discovered_at
            FROM pages WHERE crawl_run_id = ?
            ORDER BY discovered_at, id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_page).collect()
    }

    async fn load_links(&self, run_id: &str) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            r#"
            SELECT id, crawl_run_id, from_page_id, to_url, to_normalized_url,
                   link_type, is_broken, status_code
            FROM links WHERE crawl_run_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_link).collect()
    }

    async fn load_issues(&self, run_id: &str) -> Result<Vec<Issue>> {
        let rows = sqlx::query(
            r#"
            SELECT id, crawl_run_id, page_id, issue_type, severity,
                   title, description, recommendation, evidence
            FROM issues WHERE crawl_run_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_issue).collect()
    }

    async fn mark_links_broken(&self, updates: &[(String, u16)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for chunk in updates.chunks(BATCH_SIZE) {
            for (link_id, status) in chunk {
                sqlx::query("UPDATE links SET is_broken = 1, status_code = ? WHERE id = ?")
                    .bind(*status as i64)
                    .bind(link_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_template(&self, template: &Template) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO templates
            (id, crawl_run_id, signature_hash, signature, sample_page_id, page_count)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (crawl_run_id, signature_hash) DO UPDATE SET
                signature = excluded.signature,
                sample_page_id = excluded.sample_page_id,
                page_count = excluded.page_count
            "#,
        )
        .bind(&template.id)
        .bind(&template.crawl_run_id)
        .bind(&template.signature_hash)
        .bind(template.signature.to_string())
        .bind(&template.sample_page_id)
        .bind(template.page_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assign_page_templates(
        &self,
        run_id: &str,
        signature_hash: &str,
        template_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pages SET template_id = ?
            WHERE crawl_run_id = ? AND template_signature_hash = ?
            "#,
        )
        .bind(template_id)
        .bind(run_id)
        .bind(signature_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, start_url, domain, settings, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.start_url)
        .bind(&project.domain)
        .bind(project.settings.to_string())
        .bind(project.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn enqueue_run(&self, run: &CrawlRun) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM crawl_runs
            WHERE project_id = ? AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(&run.project_id)
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            bail!(
                "project {} already has an active crawl run",
                run.project_id
            );
        }

        sqlx::query(
            r#"
            INSERT INTO crawl_runs
            (id, project_id, status, started_at, finished_at, settings_snapshot, totals, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.project_id)
        .bind(run.status)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.settings_snapshot.to_string())
        .bind(run.totals.to_string())
        .bind(run.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_run(&self, run_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_runs SET status = 'CANCELED', finished_at = ?
            WHERE id = ? AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
