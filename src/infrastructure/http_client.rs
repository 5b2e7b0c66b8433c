//! HTTP client construction for crawling.
//!
//! Redirects are disabled at the client level: the fetcher follows them by
//! hand so every hop can be recorded on the page's redirect chain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;

use crate::domain::repositories::{FetcherFactory, PageFetcher};
use crate::domain::settings::CrawlSettings;
use crate::engine::fetcher::HttpFetcher;

/// Build a crawl client with the given user agent and request timeout.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).context("invalid user agent")?,
    );

    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("failed to build HTTP client")
}

/// Produces one `HttpFetcher` per run, configured from the run's settings.
pub struct HttpFetcherFactory {
    timeout: Duration,
}

impl HttpFetcherFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl FetcherFactory for HttpFetcherFactory {
    fn for_settings(&self, settings: &CrawlSettings) -> Result<Arc<dyn PageFetcher>> {
        let client = build_client(&settings.user_agent, self.timeout)?;
        Ok(Arc::new(HttpFetcher::new(client)))
    }
}
