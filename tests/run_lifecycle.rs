//! Run state machine, idempotent retries, and store invariants.

mod support;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use hydrafrog_engine::domain::entities::{CrawlRunStatus, Issue, IssueSeverity, LinkType, Page};
use hydrafrog_engine::domain::repositories::{CrawlStore, JobQueue, PageFetcher};
use hydrafrog_engine::domain::totals::CrawlTotals;
use hydrafrog_engine::engine::JobRunner;

use support::*;

fn runner(db: &TestDb, fetcher: Arc<dyn PageFetcher>) -> JobRunner {
    JobRunner::new(
        db.store.clone(),
        db.queue.clone(),
        Arc::new(FixedFetcherFactory(fetcher)),
    )
}

fn stale_page(run_id: &str) -> Page {
    Page {
        id: Uuid::new_v4().to_string(),
        crawl_run_id: run_id.to_string(),
        url: "https://a.test/stale".into(),
        normalized_url: "https://a.test/stale".into(),
        status_code: Some(200),
        content_type: None,
        title: None,
        meta_description: None,
        h1_count: 0,
        canonical: None,
        robots_meta: None,
        word_count: None,
        redirect_chain: Vec::new(),
        template_signature_hash: None,
        template_signature: None,
        template_id: None,
        fetch_error: None,
        discovered_at: Utc::now(),
    }
}

#[tokio::test]
async fn retry_wipes_children_before_recrawl() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    let run = queued_run(&project, json!({ "throttleMs": 0 }));
    seed_run(&db, &project, &run).await;

    // Leftovers from a half-finished earlier delivery of the same job.
    let leftover = stale_page(&run.id);
    let leftover_issue = Issue {
        id: Uuid::new_v4().to_string(),
        crawl_run_id: run.id.clone(),
        page_id: Some(leftover.id.clone()),
        issue_type: "H1_MISSING".into(),
        severity: IssueSeverity::High,
        title: "x".into(),
        description: "x".into(),
        recommendation: "x".into(),
        evidence: json!({}),
    };
    db.store
        .persist_page(&leftover, &[leftover_issue])
        .await
        .unwrap();
    assert_eq!(db.store.load_pages(&run.id).await.unwrap().len(), 1);

    let site = ScriptedSite::new().page("https://a.test/", clean_page("Acme Widgets Home", &[]));
    let job = db.queue.pop().await.unwrap().unwrap();
    runner(&db, Arc::new(site)).process_job(&job).await.unwrap();

    let pages = db.store.load_pages(&run.id).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].normalized_url, "https://a.test/");
    assert!(db.store.load_issues(&run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn redelivery_after_done_leaves_data_untouched() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    let run = queued_run(&project, json!({ "throttleMs": 0 }));
    seed_run(&db, &project, &run).await;

    let site: Arc<dyn PageFetcher> =
        Arc::new(ScriptedSite::new().page("https://a.test/", clean_page("Acme Widgets Home", &[])));

    let job = db.queue.pop().await.unwrap().unwrap();
    runner(&db, site.clone()).process_job(&job).await.unwrap();
    let pages_before = db.store.load_pages(&run.id).await.unwrap();

    // The queue delivers the same job again.
    db.queue.push(&run.id, &project.id).await.unwrap();
    let job = db.queue.pop().await.unwrap().unwrap();
    runner(&db, site).process_job(&job).await.unwrap();

    let reloaded = db.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, CrawlRunStatus::Done);
    let pages_after = db.store.load_pages(&run.id).await.unwrap();
    assert_eq!(pages_before.len(), pages_after.len());
    assert_eq!(pages_before[0].id, pages_after[0].id, "rows were not rewritten");
}

#[tokio::test]
async fn cancel_queued_run_before_dispatch() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    let run = queued_run(&project, json!({ "throttleMs": 0 }));
    seed_run(&db, &project, &run).await;

    assert!(db.store.cancel_run(&run.id).await.unwrap());

    let site = ScriptedSite::new().page("https://a.test/", clean_page("Acme Widgets Home", &[]));
    let job = db.queue.pop().await.unwrap().unwrap();
    runner(&db, Arc::new(site)).process_job(&job).await.unwrap();

    let reloaded = db.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, CrawlRunStatus::Canceled);
    assert!(reloaded.started_at.is_none(), "run never started");
    assert!(db.store.load_pages(&run.id).await.unwrap().is_empty());
    assert!(db.queue.pop().await.unwrap().is_none(), "job acknowledged");
}

#[tokio::test]
async fn terminal_states_are_sinks() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    let run = queued_run(&project, json!({ "throttleMs": 0 }));
    seed_run(&db, &project, &run).await;

    let site = ScriptedSite::new().page("https://a.test/", clean_page("Acme Widgets Home", &[]));
    let job = db.queue.pop().await.unwrap().unwrap();
    runner(&db, Arc::new(site)).process_job(&job).await.unwrap();

    assert!(!db
        .store
        .update_run_status(&run.id, CrawlRunStatus::Running)
        .await
        .unwrap());
    assert!(!db.store.cancel_run(&run.id).await.unwrap());

    let reloaded = db.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, CrawlRunStatus::Done);
}

#[tokio::test]
async fn one_active_run_per_project() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    db.store.create_project(&project).await.unwrap();

    let first = queued_run(&project, json!({}));
    db.store.enqueue_run(&first).await.unwrap();

    let second = queued_run(&project, json!({}));
    assert!(
        db.store.enqueue_run(&second).await.is_err(),
        "second concurrent run refused"
    );

    // Once the first is terminal, a new run may be enqueued.
    assert!(db.store.cancel_run(&first.id).await.unwrap());
    db.store.enqueue_run(&second).await.unwrap();
}

#[tokio::test]
async fn invalid_start_url_fails_the_run() {
    let db = test_db().await;
    let project = project("not a url at all", "a.test");
    let run = queued_run(&project, json!({ "throttleMs": 0 }));
    seed_run(&db, &project, &run).await;

    let site = ScriptedSite::new();
    let job = db.queue.pop().await.unwrap().unwrap();
    let result = runner(&db, Arc::new(site)).process_job(&job).await;
    assert!(result.is_err(), "failure propagates for retry accounting");

    let reloaded = db.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, CrawlRunStatus::Failed);
    assert!(reloaded.finished_at.is_some());

    let totals = CrawlTotals::from_value(&reloaded.totals);
    let message = totals.last_error_message.expect("error recorded");
    assert!(message.contains("invalid start URL"), "got: {message}");
}

#[tokio::test]
async fn failed_job_is_requeued_with_backoff() {
    let db = test_db().await;
    let project = project("ftp://wrong.scheme/", "a.test");
    let run = queued_run(&project, json!({ "throttleMs": 0 }));
    seed_run(&db, &project, &run).await;

    let job = db.queue.pop().await.unwrap().unwrap();
    assert_eq!(job.attempts, 0);
    let _ = runner(&db, Arc::new(ScriptedSite::new()))
        .process_job(&job)
        .await;

    // Requeued, but not yet available: the backoff pushed it out.
    assert!(db.queue.pop().await.unwrap().is_none());
}

#[tokio::test]
async fn queue_push_is_idempotent_on_job_id() {
    let db = test_db().await;
    db.queue.push("job-1", "project-1").await.unwrap();
    db.queue.push("job-1", "project-1").await.unwrap();

    assert!(db.queue.pop().await.unwrap().is_some());
    assert!(db.queue.pop().await.unwrap().is_none(), "only one row exists");
}

#[tokio::test]
async fn unvisited_link_targets_stay_unbroken() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    // Budget of one page: the linked target is admitted but never fetched.
    let run = queued_run(&project, json!({ "throttleMs": 0, "maxPages": 1 }));
    seed_run(&db, &project, &run).await;

    let site = ScriptedSite::new()
        .page("https://a.test/", clean_page("Acme Widgets Home", &["/never-visited"]));
    let job = db.queue.pop().await.unwrap().unwrap();
    runner(&db, Arc::new(site)).process_job(&job).await.unwrap();

    let links = db.store.load_links(&run.id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].link_type, LinkType::Internal);
    assert!(!links[0].is_broken, "engine reports only what it fetched");
    assert_eq!(links[0].status_code, None);

    let totals = CrawlTotals::from_value(
        &db.store.get_run(&run.id).await.unwrap().unwrap().totals,
    );
    assert_eq!(totals.broken_internal_links_count, 0);
}

#[tokio::test]
async fn page_collision_keeps_first_writer() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    let run = queued_run(&project, json!({}));
    seed_run(&db, &project, &run).await;

    let first = stale_page(&run.id);
    db.store.persist_page(&first, &[]).await.unwrap();

    let mut second = stale_page(&run.id);
    second.status_code = Some(500);
    let second_issue = Issue {
        id: Uuid::new_v4().to_string(),
        crawl_run_id: run.id.clone(),
        page_id: Some(second.id.clone()),
        issue_type: "STATUS_4XX_5XX".into(),
        severity: IssueSeverity::Critical,
        title: "x".into(),
        description: "x".into(),
        recommendation: "x".into(),
        evidence: json!({}),
    };
    db.store
        .persist_page(&second, &[second_issue])
        .await
        .unwrap();

    let pages = db.store.load_pages(&run.id).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].id, first.id);
    assert_eq!(pages[0].status_code, Some(200));
    // The colliding page's issues were dropped with it.
    assert!(db.store.load_issues(&run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_deletion_cascades_to_children() {
    let db = test_db().await;
    let project = project("https://a.test/", "a.test");
    let run = queued_run(&project, json!({ "throttleMs": 0 }));
    seed_run(&db, &project, &run).await;

    let site = ScriptedSite::new()
        .page("https://a.test/", clean_page("Acme Widgets Home", &["/missing"]));
    let job = db.queue.pop().await.unwrap().unwrap();
    runner(&db, Arc::new(site)).process_job(&job).await.unwrap();
    assert!(!db.store.load_pages(&run.id).await.unwrap().is_empty());

    sqlx::query("DELETE FROM crawl_runs WHERE id = ?")
        .bind(&run.id)
        .execute(db.db.pool())
        .await
        .unwrap();

    assert!(db.store.load_pages(&run.id).await.unwrap().is_empty());
    assert!(db.store.load_links(&run.id).await.unwrap().is_empty());
    assert!(db.store.load_issues(&run.id).await.unwrap().is_empty());
}
