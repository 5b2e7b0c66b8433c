//! Bounded, cancel-aware breadth-first traversal of one site.
//!
//! The driver owns a run's frontier and visited set; nothing is shared
//! across runs except the store. Fetches are sequential and separated by
//! the configured throttle. Cancellation is observed by polling the
//! persisted run status every few iterations, so a cancel from the control
//! plane lands within a bounded number of pages.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entities::{
    CrawlRunStatus, Issue, Link, LinkType, Page, PageResult, Project,
};
use crate::domain::repositories::{CrawlStore, PageFetcher};
use crate::domain::settings::CrawlSettings;
use crate::engine::canonical::{is_internal, UrlCanonicalizer};
use crate::engine::error::EngineError;
use crate::engine::rules::{self, IssueDraft};
use crate::engine::signature;

/// How many iterations pass between run-status polls.
const CANCEL_CHECK_INTERVAL: usize = 20;

/// What the traversal loop reports back to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub pages_processed: usize,
    pub canceled: bool,
}

pub struct BfsDriver {
    store: Arc<dyn CrawlStore>,
    fetcher: Arc<dyn PageFetcher>,
}

impl BfsDriver {
    pub fn new(store: Arc<dyn CrawlStore>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Crawl one run to completion, a bound, or cancellation.
    pub async fn crawl(
        &self,
        run_id: &str,
        project: &Project,
        settings: &CrawlSettings,
    ) -> Result<CrawlOutcome, EngineError> {
        let canonicalizer = UrlCanonicalizer::new(&settings.ignore_params);
        let start = canonicalizer
            .normalize(&project.start_url)
            .ok_or_else(|| EngineError::InvalidStartUrl(project.start_url.clone()))?;

        let max_pages = settings.max_pages as usize;
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
        visited.insert(start.clone());
        frontier.push_back((start, 0));

        let mut pages_processed = 0usize;
        let mut iterations = 0usize;
        let mut canceled = false;

        info!(run_id, start_url = %project.start_url, max_pages, "crawl started");

        while let Some((url, depth)) = frontier.pop_front() {
            if pages_processed >= max_pages {
                debug!(run_id, pages_processed, "page budget exhausted");
                break;
            }

            iterations += 1;
            if iterations % CANCEL_CHECK_INTERVAL == 0 {
                let status = self.store.read_run_status(run_id).await?;
                if status == CrawlRunStatus::Canceled {
                    info!(run_id, pages_processed, "cancellation observed, stopping");
                    canceled = true;
                    break;
                }
            }

            if depth > settings.max_depth {
                continue;
            }

            debug!(run_id, url = %url, depth, "fetching page");
            let result = self.fetcher.fetch(&url).await;
            pages_processed += 1;

            let page = build_page(run_id, &url, &result);
            let issues = drafts_to_issues(run_id, Some(&page.id), rules::evaluate(&result));

            if let Err(e) = self.store.persist_page(&page, &issues).await {
                warn!(run_id, url = %url, error = %e, "page persistence failed, continuing");
            } else {
                self.record_links(
                    run_id,
                    project,
                    settings,
                    &canonicalizer,
                    &page,
                    &result,
                    depth,
                    max_pages,
                    &mut visited,
                    &mut frontier,
                )
                .await;
            }

            if settings.throttle_ms > 0 && !frontier.is_empty() {
                tokio::time::sleep(Duration::from_millis(settings.throttle_ms)).await;
            }
        }

        info!(run_id, pages_processed, canceled, "crawl loop finished");
        Ok(CrawlOutcome {
            pages_processed,
            canceled,
        })
    }

    /// Persist all outbound edges of a fetched page and admit new internal
    /// URLs to the frontier.
    #[allow(clippy::too_many_arguments)]
    async fn record_links(
        &self,
        run_id: &str,
        project: &Project,
        settings: &CrawlSettings,
        canonicalizer: &UrlCanonicalizer,
        page: &Page,
        result: &PageResult,
        depth: u32,
        max_pages: usize,
        visited: &mut HashSet<String>,
        frontier: &mut VecDeque<(String, u32)>,
    ) {
        if result.links.is_empty() {
            return;
        }

        // Hrefs resolve against the end of the redirect chain, not the URL
        // we asked for.
        let base = if result.url.is_empty() {
            page.url.as_str()
        } else {
            result.url.as_str()
        };

        let mut rows = Vec::with_capacity(result.links.len());
        for href in &result.links {
            let normalized = canonicalizer.resolve_and_normalize(href, base);
            let internal = normalized
                .as_deref()
                .map(|n| is_internal(n, &project.domain, settings.include_subdomains))
                .unwrap_or(false);

            rows.push(Link {
                id: Uuid::new_v4().to_string(),
                crawl_run_id: run_id.to_string(),
                from_page_id: Some(page.id.clone()),
                to_url: href.clone(),
                to_normalized_url: normalized.clone(),
                link_type: if internal {
                    LinkType::Internal
                } else {
                    LinkType::External
                },
                is_broken: false,
                status_code: None,
            });

            if internal {
                if let Some(normalized) = normalized {
                    let within_depth = depth + 1 <= settings.max_depth;
                    if within_depth
                        && visited.len() < max_pages
                        && !visited.contains(&normalized)
                    {
                        visited.insert(normalized.clone());
                        frontier.push_back((normalized, depth + 1));
                    }
                }
            }
        }

        if let Err(e) = self.store.persist_links(&rows).await {
            warn!(run_id, page = %page.url, error = %e, "link persistence failed, continuing");
        }
    }
}

fn build_page(run_id: &str, url: &str, result: &PageResult) -> Page {
    let (signature_hash, signature_value) = match &result.html {
        Some(html) => {
            let (hash, signature) = signature::compute(html);
            (
                Some(hash),
                Some(serde_json::to_value(&signature).unwrap_or(serde_json::Value::Null)),
            )
        }
        None => (None, None),
    };

    Page {
        id: Uuid::new_v4().to_string(),
        crawl_run_id: run_id.to_string(),
        url: url.to_string(),
        normalized_url: url.to_string(),
        status_code: result.status_code,
        content_type: result.content_type.clone(),
        title: result.title.clone(),
        meta_description: result.meta_description.clone(),
        h1_count: result.h1_count,
        canonical: result.canonical.clone(),
        robots_meta: result.robots_meta.clone(),
        word_count: result.word_count,
        redirect_chain: result.redirect_chain.clone(),
        template_signature_hash: signature_hash,
        template_signature: signature_value,
        template_id: None,
        fetch_error: result.error.clone(),
        discovered_at: Utc::now(),
    }
}

/// Attach ids and a page binding to rule drafts.
pub fn drafts_to_issues(
    run_id: &str,
    page_id: Option<&str>,
    drafts: Vec<IssueDraft>,
) -> Vec<Issue> {
    drafts
        .into_iter()
        .map(|draft| Issue {
            id: Uuid::new_v4().to_string(),
            crawl_run_id: run_id.to_string(),
            page_id: page_id.map(|id| id.to_string()),
            issue_type: draft.issue_type.to_string(),
            severity: draft.severity,
            title: draft.title.to_string(),
            description: draft.description.to_string(),
            recommendation: draft.recommendation.to_string(),
            evidence: draft.evidence,
        })
        .collect()
}
