//! Shared fixtures: a temp-database store and a scripted in-memory site.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use hydrafrog_engine::domain::entities::{CrawlRun, CrawlRunStatus, PageResult, Project, RedirectHop};
use hydrafrog_engine::domain::repositories::{CrawlStore, FetcherFactory, JobQueue, PageFetcher};
use hydrafrog_engine::engine::fetcher::extract_page_fields;
use hydrafrog_engine::infrastructure::{DatabaseConnection, SqliteCrawlStore, SqliteJobQueue};

pub struct TestDb {
    pub store: Arc<SqliteCrawlStore>,
    pub queue: Arc<SqliteJobQueue>,
    pub db: DatabaseConnection,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("engine.db").display());
    let db = DatabaseConnection::new(&url).await.expect("connect");
    db.migrate().await.expect("migrate");
    TestDb {
        store: Arc::new(SqliteCrawlStore::new(db.pool().clone())),
        queue: Arc::new(SqliteJobQueue::new(db.pool().clone())),
        db,
        _dir: dir,
    }
}

pub fn project(start_url: &str, domain: &str) -> Project {
    Project {
        id: Uuid::new_v4().to_string(),
        name: format!("{domain} audit"),
        start_url: start_url.to_string(),
        domain: domain.to_string(),
        settings: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

pub fn queued_run(project: &Project, settings: serde_json::Value) -> CrawlRun {
    CrawlRun {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        status: CrawlRunStatus::Queued,
        started_at: None,
        finished_at: None,
        settings_snapshot: settings,
        totals: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

/// Register project + run and push the job, the way the control plane does.
pub async fn seed_run(db: &TestDb, project: &Project, run: &CrawlRun) {
    db.store.create_project(project).await.expect("project");
    db.store.enqueue_run(run).await.expect("run");
    db.queue.push(&run.id, &project.id).await.expect("push");
}

const SCRIPTED_REDIRECT_CAP: usize = 10;

pub enum ScriptedResponse {
    Html { status: u16, body: String },
    Raw { status: u16, content_type: &'static str },
    Redirect { status: u16, location: String },
    Error { message: String },
}

/// Deterministic in-memory site keyed by normalized URL. Unknown URLs
/// answer with a plain-text 404.
#[derive(Default)]
pub struct ScriptedSite {
    responses: HashMap<String, ScriptedResponse>,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.responses.insert(
            url.to_string(),
            ScriptedResponse::Html {
                status: 200,
                body: body.into(),
            },
        );
        self
    }

    pub fn with(mut self, url: &str, response: ScriptedResponse) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }
}

#[async_trait]
impl PageFetcher for ScriptedSite {
    async fn fetch(&self, url: &str) -> PageResult {
        let mut current = url.to_string();
        let mut chain: Vec<RedirectHop> = Vec::new();

        loop {
            match self.responses.get(&current) {
                Some(ScriptedResponse::Redirect { status, location }) => {
                    chain.push(RedirectHop {
                        url: current,
                        status_code: *status,
                    });
                    if chain.len() >= SCRIPTED_REDIRECT_CAP {
                        return PageResult {
                            url: location.clone(),
                            status_code: Some(*status),
                            redirect_chain: chain,
                            error: Some("redirect cap of 10 exceeded".into()),
                            ..Default::default()
                        };
                    }
                    current = location.clone();
                }
                Some(ScriptedResponse::Html { status, body }) => {
                    let fields = extract_page_fields(body);
                    return PageResult {
                        url: current,
                        status_code: Some(*status),
                        content_type: Some("text/html; charset=utf-8".into()),
                        title: fields.title,
                        meta_description: fields.meta_description,
                        h1_count: fields.h1_count,
                        canonical: fields.canonical,
                        robots_meta: fields.robots_meta,
                        word_count: Some(fields.word_count),
                        redirect_chain: chain,
                        links: fields.links,
                        images_missing_alt: fields.images_missing_alt,
                        html: Some(body.clone()),
                        error: None,
                    };
                }
                Some(ScriptedResponse::Raw {
                    status,
                    content_type,
                }) => {
                    return PageResult {
                        url: current,
                        status_code: Some(*status),
                        content_type: Some(content_type.to_string()),
                        redirect_chain: chain,
                        ..Default::default()
                    };
                }
                Some(ScriptedResponse::Error { message }) => {
                    return PageResult {
                        url: current,
                        status_code: None,
                        redirect_chain: chain,
                        error: Some(message.clone()),
                        ..Default::default()
                    };
                }
                None => {
                    return PageResult {
                        url: current,
                        status_code: Some(404),
                        content_type: Some("text/plain".into()),
                        redirect_chain: chain,
                        ..Default::default()
                    };
                }
            }
        }
    }
}

/// Factory handing the same fetcher to every run.
pub struct FixedFetcherFactory(pub Arc<dyn PageFetcher>);

impl FetcherFactory for FixedFetcherFactory {
    fn for_settings(
        &self,
        _settings: &hydrafrog_engine::domain::CrawlSettings,
    ) -> anyhow::Result<Arc<dyn PageFetcher>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Wrapper that cancels the run after N completed fetches, simulating a
/// control-plane cancel landing mid-crawl.
pub struct CancelAfter {
    inner: Arc<dyn PageFetcher>,
    store: Arc<SqliteCrawlStore>,
    run_id: String,
    after: usize,
    fetched: AtomicUsize,
}

impl CancelAfter {
    pub fn new(
        inner: Arc<dyn PageFetcher>,
        store: Arc<SqliteCrawlStore>,
        run_id: &str,
        after: usize,
    ) -> Self {
        Self {
            inner,
            store,
            run_id: run_id.to_string(),
            after,
            fetched: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageFetcher for CancelAfter {
    async fn fetch(&self, url: &str) -> PageResult {
        let result = self.inner.fetch(url).await;
        let n = self.fetched.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.after {
            self.store.cancel_run(&self.run_id).await.expect("cancel");
        }
        result
    }
}

/// Enough prose to stay clear of the thin-content threshold.
pub fn filler_text() -> String {
    "crawl ".repeat(160).trim_end().to_string()
}

/// A page with every SEO box ticked: long-enough title, description,
/// canonical, one h1, 160 words of text. Produces zero issues.
pub fn clean_page(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{href}">link</a>"#))
        .collect();
    format!(
        r#"<html><head><title>{title}</title><meta name="description" content="A test page."><link rel="canonical" href="https://a.test/"></head><body><h1>{title}</h1><p>{}</p>{anchors}</body></html>"#,
        filler_text()
    )
}
