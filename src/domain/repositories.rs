//! Trait seams between the engine and its collaborators.
//!
//! The driver and post-processor talk to persistence exclusively through
//! `CrawlStore`, to the network through `PageFetcher`, and the worker loop
//! to dispatch through `JobQueue`. These are the mock points for tests.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::entities::{
    CrawlRun, CrawlRunStatus, Issue, Link, Page, PageResult, Project, Template,
};
use crate::domain::totals::CrawlTotals;

/// A dequeued crawl job. The job id doubles as the crawl run id, which
/// gives the queue idempotency on re-delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub job_id: String,
    pub project_id: String,
    pub attempts: u32,
}

/// Persistence seam for everything a run owns.
///
/// Writes are partitioned by `crawl_run_id`, so concurrent runs never
/// contend logically. `persist_page` commits the page and its issues as one
/// transaction; a partial failure must roll back both.
#[async_trait]
pub trait CrawlStore: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    async fn get_run(&self, run_id: &str) -> Result<Option<CrawlRun>>;

    /// Cheap status poll used by the driver's cancellation check.
    async fn read_run_status(&self, run_id: &str) -> Result<CrawlRunStatus>;

    /// Transition the run, stamping `started_at`/`finished_at` as the
    /// target status dictates. Terminal states are sinks: a run already in
    /// one is left untouched and `false` is returned.
    async fn update_run_status(&self, run_id: &str, status: CrawlRunStatus) -> Result<bool>;

    async fn update_run_totals(&self, run_id: &str, totals: &CrawlTotals) -> Result<()>;

    /// Delete all child rows of the run. Called before the first fetch so
    /// re-delivery of the same job is safe.
    async fn wipe_children(&self, run_id: &str) -> Result<()>;

    /// Upsert one page and bulk-insert its issues atomically. Collisions on
    /// `(crawl_run_id, normalized_url)` are a no-op: first writer wins.
    async fn persist_page(&self, page: &Page, issues: &[Issue]) -> Result<()>;

    /// Insert link rows unconditionally; the link graph keeps multiplicities.
    async fn persist_links(&self, links: &[Link]) -> Result<()>;

    /// Bulk-insert issues not tied to a single page write (global issues).
    async fn persist_issues(&self, issues: &[Issue]) -> Result<()>;

    async fn load_pages(&self, run_id: &str) -> Result<Vec<Page>>;

    async fn load_links(&self, run_id: &str) -> Result<Vec<Link>>;

    async fn load_issues(&self, run_id: &str) -> Result<Vec<Issue>>;

    /// Mark links broken, filling in the target's status code. Updates are
    /// `(link_id, status_code)` pairs.
    async fn mark_links_broken(&self, updates: &[(String, u16)]) -> Result<()>;

    /// Insert or replace the template for `(crawl_run_id, signature_hash)`.
    async fn upsert_template(&self, template: &Template) -> Result<()>;

    /// Back-fill `template_id` on every page of the run sharing the hash.
    async fn assign_page_templates(
        &self,
        run_id: &str,
        signature_hash: &str,
        template_id: &str,
    ) -> Result<()>;

    // Control-plane-shaped operations, exposed so run invariants are
    // enforceable without the external REST layer.

    async fn create_project(&self, project: &Project) -> Result<()>;

    /// Create a QUEUED run. Fails if the project already has a run in
    /// {QUEUED, RUNNING}.
    async fn enqueue_run(&self, run: &CrawlRun) -> Result<()>;

    /// Flip a QUEUED or RUNNING run to CANCELED. Returns false when the run
    /// was already terminal.
    async fn cancel_run(&self, run_id: &str) -> Result<bool>;
}

/// At-least-once job dispatch keyed by `job_id == crawl_run_id`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job_id: &str, project_id: &str) -> Result<()>;

    /// Take the next available job, marking it in-flight.
    async fn pop(&self) -> Result<Option<CrawlJob>>;

    /// Remove a finished job.
    async fn ack(&self, job_id: &str) -> Result<()>;

    /// Return a failed job to the queue with backoff, for retry accounting.
    async fn nack(&self, job_id: &str) -> Result<()>;
}

/// Network seam. Fetch failures are encoded in the result rather than
/// returned as errors, because an unreachable page is still a page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> PageResult;
}

/// Builds a fetcher for one run. The user agent and timeout come from the
/// run's settings snapshot, so the fetcher cannot be shared across runs.
pub trait FetcherFactory: Send + Sync {
    fn for_settings(
        &self,
        settings: &crate::domain::settings::CrawlSettings,
    ) -> Result<std::sync::Arc<dyn PageFetcher>>;
}
