//! Typed failures the job runner branches on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The project's start URL did not survive normalization; the run
    /// fails immediately.
    #[error("invalid start URL: {0}")]
    InvalidStartUrl(String),

    #[error("crawl run not found: {0}")]
    RunNotFound(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("post-processing failed: {0}")]
    PostProcessing(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
