//! Worker process configuration.
//!
//! Everything the binary needs, loadable from environment variables with
//! sensible defaults. Per-crawl behavior lives in the run's settings
//! snapshot, not here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database shared with the control plane.
    pub database_url: String,

    /// How many runs this worker executes in parallel. Within a run,
    /// fetches stay sequential.
    pub worker_concurrency: usize,

    /// Sleep between queue polls when no job is available.
    pub queue_poll_interval_ms: u64,

    /// Per-request HTTP timeout.
    pub request_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://hydrafrog.db".to_string(),
            worker_concurrency: 1,
            queue_poll_interval_ms: 1000,
            request_timeout_seconds: 30,
        }
    }
}

impl EngineConfig {
    /// Read configuration from `HYDRAFROG_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("HYDRAFROG_DATABASE_URL")
                .unwrap_or(defaults.database_url),
            worker_concurrency: env_parse("HYDRAFROG_WORKER_CONCURRENCY")
                .unwrap_or(defaults.worker_concurrency),
            queue_poll_interval_ms: env_parse("HYDRAFROG_QUEUE_POLL_INTERVAL_MS")
                .unwrap_or(defaults.queue_poll_interval_ms),
            request_timeout_seconds: env_parse("HYDRAFROG_REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
