//! Crawl worker: polls the job queue and executes runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hydrafrog_engine::domain::repositories::JobQueue;
use hydrafrog_engine::engine::JobRunner;
use hydrafrog_engine::infrastructure::{
    init_logging, DatabaseConnection, EngineConfig, HttpFetcherFactory, SqliteCrawlStore,
    SqliteJobQueue,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env();
    init_logging();
    info!(
        db = %config.database_url,
        concurrency = config.worker_concurrency,
        "starting crawl worker"
    );

    let db = DatabaseConnection::new(&config.database_url).await?;
    db.migrate().await?;

    let store = Arc::new(SqliteCrawlStore::new(db.pool().clone()));
    let queue = Arc::new(SqliteJobQueue::new(db.pool().clone()));
    let fetchers = Arc::new(HttpFetcherFactory::new(Duration::from_secs(
        config.request_timeout_seconds,
    )));
    let runner = Arc::new(JobRunner::new(store, queue.clone(), fetchers));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    run_worker_loop(&config, queue, runner, shutdown).await;
    info!("crawl worker stopped");
    Ok(())
}

/// Poll the queue and execute jobs with bounded concurrency: a semaphore
/// permit is acquired before the queue is touched and rides along with the
/// spawned task. In-flight runs finish before the process exits; their own
/// cancellation, if any, comes through the run status in the database.
async fn run_worker_loop(
    config: &EngineConfig,
    queue: Arc<SqliteJobQueue>,
    runner: Arc<JobRunner>,
    shutdown: CancellationToken,
) {
    let poll_interval = Duration::from_millis(config.queue_poll_interval_ms);
    let semaphore = Arc::new(Semaphore::new(config.worker_concurrency));
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "crawl task panicked");
            }
        }

        // A free worker slot gates the queue poll, so a popped job is never
        // left waiting for capacity.
        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.cancelled() => break,
        };

        match queue.pop().await {
            Ok(Some(job)) => {
                let runner = Arc::clone(&runner);
                in_flight.spawn(async move {
                    let _permit = permit;
                    // Failures are already recorded on the run and requeued.
                    let _ = runner.process_job(&job).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
            Err(e) => {
                error!(error = %e, "queue poll failed");
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
}
