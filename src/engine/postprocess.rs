//! Post-crawl joins and aggregations.
//!
//! Runs once the BFS loop returns, and never for a canceled run. Joins the
//! link graph against the page table to mark broken edges, computes run
//! totals, emits cross-page issues, clusters templates, and writes the
//! issue summary.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::entities::{Issue, Link, LinkType, Page, Template};
use crate::domain::repositories::CrawlStore;
use crate::domain::totals::{CrawlTotals, TopErrorPage, TopIssueType};
use crate::engine::driver::drafts_to_issues;
use crate::engine::rules;

const TOP_ERROR_PAGES: usize = 10;
const TOP_ISSUE_TYPES: usize = 10;
const DUPLICATE_TITLE_SAMPLE_URLS: usize = 5;

pub struct PostProcessor {
    store: Arc<dyn CrawlStore>,
}

impl PostProcessor {
    pub fn new(store: Arc<dyn CrawlStore>) -> Self {
        Self { store }
    }

    /// Run every post-processing stage and persist the final totals.
    pub async fn run(&self, run_id: &str) -> Result<CrawlTotals> {
        let pages = self.store.load_pages(run_id).await?;
        let links = self.store.load_links(run_id).await?;

        let broken = self.resolve_broken_links(run_id, &pages, &links).await?;
        self.emit_duplicate_title_issues(run_id, &pages).await?;
        self.cluster_templates(run_id, &pages).await?;

        let mut totals = compute_totals(&pages, &links, broken);
        let issues = self.store.load_issues(run_id).await?;
        merge_issue_summary(&mut totals, &issues);

        self.store.update_run_totals(run_id, &totals).await?;
        info!(
            run_id,
            pages = totals.pages_count,
            links = totals.links_count,
            issues = totals.issue_count_total,
            "post-processing finished"
        );
        Ok(totals)
    }

    /// Mark internal links whose crawled target answered with an error.
    /// Targets the crawl never visited stay untouched: the engine reports
    /// only what it fetched.
    async fn resolve_broken_links(
        &self,
        run_id: &str,
        pages: &[Page],
        links: &[Link],
    ) -> Result<u64> {
        let status_by_url: HashMap<&str, Option<u16>> = pages
            .iter()
            .map(|p| (p.normalized_url.as_str(), p.status_code))
            .collect();

        let mut updates = Vec::new();
        for link in links {
            if link.link_type != LinkType::Internal {
                continue;
            }
            let Some(target) = link.to_normalized_url.as_deref() else {
                continue;
            };
            if let Some(Some(status)) = status_by_url.get(target) {
                if *status >= 400 {
                    updates.push((link.id.clone(), *status));
                }
            }
        }

        let broken = updates.len() as u64;
        if !updates.is_empty() {
            self.store.mark_links_broken(&updates).await?;
        }
        debug!(run_id, broken, "broken-link resolution done");
        Ok(broken)
    }

    /// Group pages by lower-cased trimmed title and flag every member of a
    /// group of two or more.
    async fn emit_duplicate_title_issues(&self, run_id: &str, pages: &[Page]) -> Result<()> {
        // BTreeMap keeps group emission order deterministic.
        let mut groups: BTreeMap<String, Vec<&Page>> = BTreeMap::new();
        for page in pages {
            let title = page.title.as_deref().unwrap_or("").trim();
            if title.is_empty() {
                continue;
            }
            groups.entry(title.to_lowercase()).or_default().push(page);
        }

        let mut issues: Vec<Issue> = Vec::new();
        for members in groups.values().filter(|members| members.len() >= 2) {
            let original_title = members[0].title.as_deref().unwrap_or("").trim().to_string();
            let sample_urls: Vec<String> = members
                .iter()
                .take(DUPLICATE_TITLE_SAMPLE_URLS)
                .map(|p| p.normalized_url.clone())
                .collect();

            for page in members {
                let draft = rules::duplicate_title_draft(
                    &original_title,
                    members.len(),
                    sample_urls.clone(),
                );
                issues.extend(drafts_to_issues(run_id, Some(&page.id), vec![draft]));
            }
        }

        if !issues.is_empty() {
            debug!(run_id, count = issues.len(), "duplicate-title issues emitted");
            self.store.persist_issues(&issues).await?;
        }
        Ok(())
    }

    /// Upsert one template per distinct signature hash and back-fill the
    /// template id on every member page.
    async fn cluster_templates(&self, run_id: &str, pages: &[Page]) -> Result<()> {
        let mut clusters: BTreeMap<&str, Vec<&Page>> = BTreeMap::new();
        for page in pages {
            if let Some(hash) = page.template_signature_hash.as_deref() {
                clusters.entry(hash).or_default().push(page);
            }
        }

        for (hash, members) in &clusters {
            let sample = members[0];
            let template = Template {
                id: Uuid::new_v4().to_string(),
                crawl_run_id: run_id.to_string(),
                signature_hash: hash.to_string(),
                signature: sample
                    .template_signature
                    .clone()
                    .unwrap_or(serde_json::Value::Null),
                sample_page_id: sample.id.clone(),
                page_count: members.len() as u64,
            };
            self.store.upsert_template(&template).await?;
            self.store
                .assign_page_templates(run_id, hash, &template.id)
                .await?;
        }

        debug!(run_id, templates = clusters.len(), "template clustering done");
        Ok(())
    }
}

fn compute_totals(pages: &[Page], links: &[Link], broken_internal: u64) -> CrawlTotals {
    let mut totals = CrawlTotals::default();
    totals.pages_count = pages.len() as u64;
    totals.links_count = links.len() as u64;
    totals.internal_links_count = links
        .iter()
        .filter(|l| l.link_type == LinkType::Internal)
        .count() as u64;
    totals.external_links_count = totals.links_count - totals.internal_links_count;
    totals.broken_internal_links_count = broken_internal;

    // Pages that never produced a response land in the "0" bucket, keeping
    // the distribution summing to pages_count.
    for page in pages {
        let key = page.status_code.unwrap_or(0).to_string();
        *totals.status_code_distribution.entry(key).or_insert(0) += 1;
    }

    totals.top_error_pages = top_error_pages(pages, links);
    totals
}

/// Error pages ranked by how many internal links point at them; ties break
/// by URL ascending.
fn top_error_pages(pages: &[Page], links: &[Link]) -> Vec<TopErrorPage> {
    let mut in_links: HashMap<&str, u64> = HashMap::new();
    for link in links {
        if link.link_type == LinkType::Internal {
            if let Some(target) = link.to_normalized_url.as_deref() {
                *in_links.entry(target).or_insert(0) += 1;
            }
        }
    }

    let mut entries: Vec<TopErrorPage> = pages
        .iter()
        .filter_map(|page| {
            let status = page.status_code?;
            if status < 400 {
                return None;
            }
            Some(TopErrorPage {
                url: page.normalized_url.clone(),
                status_code: status,
                count: in_links
                    .get(page.normalized_url.as_str())
                    .copied()
                    .unwrap_or(0),
            })
        })
        .collect();

    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.url.cmp(&b.url)));
    entries.truncate(TOP_ERROR_PAGES);
    entries
}

/// Fold issue counts by type and severity into the totals.
fn merge_issue_summary(totals: &mut CrawlTotals, issues: &[Issue]) {
    totals.issue_count_total = issues.len() as u64;
    for issue in issues {
        *totals
            .issue_count_by_type
            .entry(issue.issue_type.clone())
            .or_insert(0) += 1;
        *totals
            .issue_count_by_severity
            .entry(issue.severity.as_str().to_string())
            .or_insert(0) += 1;
    }

    let mut ranked: Vec<TopIssueType> = totals
        .issue_count_by_type
        .iter()
        .map(|(issue_type, count)| TopIssueType {
            issue_type: issue_type.clone(),
            count: *count,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.issue_type.cmp(&b.issue_type))
    });
    ranked.truncate(TOP_ISSUE_TYPES);
    totals.top_issue_types = ranked;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::IssueSeverity;
    use chrono::Utc;

    fn page(run: &str, url: &str, status: Option<u16>, title: Option<&str>) -> Page {
        Page {
            id: Uuid::new_v4().to_string(),
            crawl_run_id: run.to_string(),
            url: url.to_string(),
            normalized_url: url.to_string(),
            status_code: status,
            content_type: Some("text/html".into()),
            title: title.map(|t| t.to_string()),
            meta_description: None,
            h1_count: 1,
            canonical: None,
            robots_meta: None,
            word_count: Some(200),
            redirect_chain: Vec::new(),
            template_signature_hash: None,
            template_signature: None,
            template_id: None,
            fetch_error: None,
            discovered_at: Utc::now(),
        }
    }

    fn internal_link(run: &str, to: &str) -> Link {
        Link {
            id: Uuid::new_v4().to_string(),
            crawl_run_id: run.to_string(),
            from_page_id: None,
            to_url: to.to_string(),
            to_normalized_url: Some(to.to_string()),
            link_type: LinkType::Internal,
            is_broken: false,
            status_code: None,
        }
    }

    #[test]
    fn test_status_distribution_sums_to_pages_count() {
        let pages = vec![
            page("r", "https://a.test/", Some(200), None),
            page("r", "https://a.test/x", Some(200), None),
            page("r", "https://a.test/y", Some(404), None),
            page("r", "https://a.test/z", None, None),
        ];
        let totals = compute_totals(&pages, &[], 0);
        assert_eq!(totals.pages_count, 4);
        let sum: u64 = totals.status_code_distribution.values().sum();
        assert_eq!(sum, totals.pages_count);
        assert_eq!(totals.status_code_distribution["200"], 2);
        assert_eq!(totals.status_code_distribution["404"], 1);
        assert_eq!(totals.status_code_distribution["0"], 1);
    }

    #[test]
    fn test_top_error_pages_ordering() {
        let pages = vec![
            page("r", "https://a.test/b-err", Some(404), None),
            page("r", "https://a.test/a-err", Some(500), None),
            page("r", "https://a.test/popular-err", Some(404), None),
            page("r", "https://a.test/fine", Some(200), None),
        ];
        let links = vec![
            internal_link("r", "https://a.test/popular-err"),
            internal_link("r", "https://a.test/popular-err"),
            internal_link("r", "https://a.test/a-err"),
            internal_link("r", "https://a.test/b-err"),
            internal_link("r", "https://a.test/fine"),
        ];
        let ranked = top_error_pages(&pages, &links);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].url, "https://a.test/popular-err");
        assert_eq!(ranked[0].count, 2);
        // Tie on count=1 broken by URL ascending.
        assert_eq!(ranked[1].url, "https://a.test/a-err");
        assert_eq!(ranked[2].url, "https://a.test/b-err");
    }

    #[test]
    fn test_issue_summary_ranking() {
        let mut totals = CrawlTotals::default();
        let mk = |t: &str, severity: IssueSeverity| Issue {
            id: Uuid::new_v4().to_string(),
            crawl_run_id: "r".into(),
            page_id: None,
            issue_type: t.to_string(),
            severity,
            title: String::new(),
            description: String::new(),
            recommendation: String::new(),
            evidence: serde_json::json!({}),
        };
        let issues = vec![
            mk("MISSING_TITLE", IssueSeverity::High),
            mk("MISSING_TITLE", IssueSeverity::High),
            mk("H1_MISSING", IssueSeverity::High),
            mk("CANONICAL_MISSING", IssueSeverity::Low),
        ];
        merge_issue_summary(&mut totals, &issues);
        assert_eq!(totals.issue_count_total, 4);
        assert_eq!(totals.issue_count_by_type["MISSING_TITLE"], 2);
        assert_eq!(totals.issue_count_by_severity["HIGH"], 3);
        assert_eq!(totals.top_issue_types[0].issue_type, "MISSING_TITLE");
        // Tie between CANONICAL_MISSING and H1_MISSING broken by name.
        assert_eq!(totals.top_issue_types[1].issue_type, "CANONICAL_MISSING");
        assert_eq!(totals.top_issue_types[2].issue_type, "H1_MISSING");
    }
}
