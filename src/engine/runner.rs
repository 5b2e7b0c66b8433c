//! Job lifecycle around one crawl run.
//!
//! The runner owns the state machine: QUEUED runs transition to RUNNING,
//! get their child rows wiped for retry safety, are driven through the
//! BFS loop, and end in DONE, FAILED, or stay CANCELED. Errors anywhere
//! mark the run FAILED, stamp the message into the totals, and propagate
//! so the queue's retry accounting sees them.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::domain::entities::CrawlRunStatus;
use crate::domain::repositories::{CrawlJob, CrawlStore, FetcherFactory, JobQueue};
use crate::domain::settings::CrawlSettings;
use crate::domain::totals::CrawlTotals;
use crate::engine::driver::BfsDriver;
use crate::engine::error::EngineError;
use crate::engine::postprocess::PostProcessor;

pub struct JobRunner {
    store: Arc<dyn CrawlStore>,
    queue: Arc<dyn JobQueue>,
    fetchers: Arc<dyn FetcherFactory>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn CrawlStore>,
        queue: Arc<dyn JobQueue>,
        fetchers: Arc<dyn FetcherFactory>,
    ) -> Self {
        Self {
            store,
            queue,
            fetchers,
        }
    }

    /// Process one dequeued job to completion, acknowledging or requeueing
    /// it depending on the outcome.
    pub async fn process_job(&self, job: &CrawlJob) -> Result<()> {
        info!(job_id = %job.job_id, attempts = job.attempts, "processing crawl job");

        match self.execute(job).await {
            Ok(()) => {
                self.queue.ack(&job.job_id).await?;
                Ok(())
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "crawl job failed");
                if let Err(mark_err) = self.mark_failed(&job.job_id, &e).await {
                    warn!(job_id = %job.job_id, error = %mark_err, "could not mark run failed");
                }
                self.queue.nack(&job.job_id).await?;
                Err(e.into())
            }
        }
    }

    async fn execute(&self, job: &CrawlJob) -> Result<(), EngineError> {
        let run = self
            .store
            .get_run(&job.job_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(job.job_id.clone()))?;

        // A run canceled before dispatch (or otherwise already terminal) is
        // acknowledged untouched.
        if run.status.is_terminal() {
            info!(run_id = %run.id, status = run.status.as_str(), "run already terminal, skipping");
            return Ok(());
        }

        if !self
            .store
            .update_run_status(&run.id, CrawlRunStatus::Running)
            .await?
        {
            // Lost a race against a concurrent cancel.
            info!(run_id = %run.id, "run became terminal before start, skipping");
            return Ok(());
        }

        // Wipe before the first fetch so at-least-once delivery is safe.
        self.store.wipe_children(&run.id).await?;

        let settings = CrawlSettings::from_snapshot(&run.settings_snapshot)
            .map_err(EngineError::Other)?;
        let project = self
            .store
            .get_project(&run.project_id)
            .await?
            .ok_or_else(|| EngineError::ProjectNotFound(run.project_id.clone()))?;

        let fetcher = self.fetchers.for_settings(&settings)?;
        let driver = BfsDriver::new(self.store.clone(), fetcher);
        let outcome = driver.crawl(&run.id, &project, &settings).await?;

        // The driver may have stopped for a cancel it observed, or a cancel
        // may have landed between its last poll and here.
        let status = self.store.read_run_status(&run.id).await?;
        if outcome.canceled || status == CrawlRunStatus::Canceled {
            info!(run_id = %run.id, pages = outcome.pages_processed, "run canceled, keeping partial data");
            return Ok(());
        }

        let post = PostProcessor::new(self.store.clone());
        post.run(&run.id)
            .await
            .map_err(EngineError::PostProcessing)?;

        self.store
            .update_run_status(&run.id, CrawlRunStatus::Done)
            .await?;
        info!(run_id = %run.id, pages = outcome.pages_processed, "run done");
        Ok(())
    }

    /// Record the failure on the run: FAILED status, finished timestamp,
    /// and the error message in the totals.
    async fn mark_failed(&self, run_id: &str, err: &EngineError) -> Result<()> {
        let mut totals = match self.store.get_run(run_id).await? {
            Some(run) => CrawlTotals::from_value(&run.totals),
            None => CrawlTotals::default(),
        };
        totals.last_error_message = Some(err.to_string());
        self.store.update_run_totals(run_id, &totals).await?;
        self.store
            .update_run_status(run_id, CrawlRunStatus::Failed)
            .await?;
        Ok(())
    }
}
