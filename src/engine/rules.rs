//! Rule-based issue detection over extracted page fields.
//!
//! Evaluation is a pure function: rules are independent of each other and
//! every applicable rule fires. Titles, descriptions and recommendations
//! are constant per rule; the variable parts live in the evidence object.

use serde_json::json;

use crate::domain::entities::{IssueSeverity, PageResult};

pub const STATUS_4XX_5XX: &str = "STATUS_4XX_5XX";
pub const STATUS_3XX_REDIRECT: &str = "STATUS_3XX_REDIRECT";
pub const REDIRECT_CHAIN_LONG: &str = "REDIRECT_CHAIN_LONG";
pub const MISSING_TITLE: &str = "MISSING_TITLE";
pub const TITLE_TOO_LONG: &str = "TITLE_TOO_LONG";
pub const TITLE_TOO_SHORT: &str = "TITLE_TOO_SHORT";
pub const MISSING_META_DESCRIPTION: &str = "MISSING_META_DESCRIPTION";
pub const H1_MISSING: &str = "H1_MISSING";
pub const H1_MULTIPLE: &str = "H1_MULTIPLE";
pub const CANONICAL_MISSING: &str = "CANONICAL_MISSING";
pub const ROBOTS_NOINDEX: &str = "ROBOTS_NOINDEX";
pub const THIN_CONTENT: &str = "THIN_CONTENT";
pub const IMAGES_MISSING_ALT: &str = "IMAGES_MISSING_ALT";
pub const DUPLICATE_TITLE: &str = "DUPLICATE_TITLE";

const REDIRECT_CHAIN_THRESHOLD: usize = 3;
const TITLE_MAX_LEN: usize = 60;
const TITLE_MIN_LEN: usize = 10;
const THIN_CONTENT_WORDS: u32 = 150;

/// An issue before it gets an id and a page binding.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueDraft {
    pub issue_type: &'static str,
    pub severity: IssueSeverity,
    pub title: &'static str,
    pub description: &'static str,
    pub recommendation: &'static str,
    pub evidence: serde_json::Value,
}

/// Evaluate all per-page rules against one fetched page.
///
/// Status and redirect rules apply to every page; content rules only to
/// pages that were actually parsed as HTML, so a PDF does not get flagged
/// for a missing title.
pub fn evaluate(result: &PageResult) -> Vec<IssueDraft> {
    let mut drafts = Vec::new();

    if let Some(status) = result.status_code {
        if status >= 400 {
            drafts.push(IssueDraft {
                issue_type: STATUS_4XX_5XX,
                severity: IssueSeverity::Critical,
                title: "Page returns an error status",
                description: "The page responded with a 4xx or 5xx status code.",
                recommendation: "Fix the page or remove links pointing to it.",
                evidence: json!({ "statusCode": status }),
            });
        } else if (300..400).contains(&status) {
            drafts.push(IssueDraft {
                issue_type: STATUS_3XX_REDIRECT,
                severity: IssueSeverity::Medium,
                title: "Page is a redirect",
                description: "The page responded with a 3xx redirect status.",
                recommendation: "Link directly to the redirect target.",
                evidence: json!({ "statusCode": status }),
            });
        }
    }

    if result.redirect_chain.len() >= REDIRECT_CHAIN_THRESHOLD {
        drafts.push(IssueDraft {
            issue_type: REDIRECT_CHAIN_LONG,
            severity: IssueSeverity::High,
            title: "Long redirect chain",
            description: "Reaching the page required three or more redirects.",
            recommendation: "Point links at the final URL to avoid chained redirects.",
            evidence: json!({ "chainLength": result.redirect_chain.len() }),
        });
    }

    if result.html.is_some() {
        drafts.extend(evaluate_content_rules(result));
    }

    drafts
}

fn evaluate_content_rules(result: &PageResult) -> Vec<IssueDraft> {
    let mut drafts = Vec::new();

    let title = result.title.as_deref().unwrap_or("").trim();
    let title_len = title.chars().count();
    if title_len == 0 {
        drafts.push(IssueDraft {
            issue_type: MISSING_TITLE,
            severity: IssueSeverity::High,
            title: "Missing title",
            description: "The page has no <title> element or it is empty.",
            recommendation: "Add a unique, descriptive title to the page.",
            evidence: json!({}),
        });
    } else {
        if title_len > TITLE_MAX_LEN {
            drafts.push(IssueDraft {
                issue_type: TITLE_TOO_LONG,
                severity: IssueSeverity::Low,
                title: "Title too long",
                description: "The title exceeds 60 characters and may be truncated in results.",
                recommendation: "Shorten the title to 60 characters or fewer.",
                evidence: json!({ "length": title_len, "title": title }),
            });
        }
        if title_len < TITLE_MIN_LEN {
            drafts.push(IssueDraft {
                issue_type: TITLE_TOO_SHORT,
                severity: IssueSeverity::Low,
                title: "Title too short",
                description: "The title is shorter than 10 characters.",
                recommendation: "Expand the title to describe the page content.",
                evidence: json!({ "length": title_len, "title": title }),
            });
        }
    }

    if result
        .meta_description
        .as_deref()
        .unwrap_or("")
        .trim()
        .is_empty()
    {
        drafts.push(IssueDraft {
            issue_type: MISSING_META_DESCRIPTION,
            severity: IssueSeverity::Medium,
            title: "Missing meta description",
            description: "The page has no meta description.",
            recommendation: "Add a meta description summarizing the page.",
            evidence: json!({}),
        });
    }

    if result.h1_count == 0 {
        drafts.push(IssueDraft {
            issue_type: H1_MISSING,
            severity: IssueSeverity::High,
            title: "Missing H1 heading",
            description: "The page has no <h1> element.",
            recommendation: "Add exactly one <h1> describing the page.",
            evidence: json!({}),
        });
    } else if result.h1_count > 1 {
        drafts.push(IssueDraft {
            issue_type: H1_MULTIPLE,
            severity: IssueSeverity::Low,
            title: "Multiple H1 headings",
            description: "The page has more than one <h1> element.",
            recommendation: "Keep a single <h1> per page.",
            evidence: json!({ "h1Count": result.h1_count }),
        });
    }

    if result.canonical.as_deref().unwrap_or("").trim().is_empty() {
        drafts.push(IssueDraft {
            issue_type: CANONICAL_MISSING,
            severity: IssueSeverity::Low,
            title: "Missing canonical link",
            description: "The page declares no canonical URL.",
            recommendation: "Add a rel=canonical link to the preferred URL.",
            evidence: json!({}),
        });
    }

    let robots = result.robots_meta.as_deref().unwrap_or("");
    if robots.to_lowercase().contains("noindex") {
        drafts.push(IssueDraft {
            issue_type: ROBOTS_NOINDEX,
            severity: IssueSeverity::Medium,
            title: "Page excluded from indexing",
            description: "The robots meta tag contains noindex.",
            recommendation: "Remove noindex if the page should appear in search results.",
            evidence: json!({ "robotsMeta": robots }),
        });
    }

    if let Some(word_count) = result.word_count {
        if word_count < THIN_CONTENT_WORDS {
            drafts.push(IssueDraft {
                issue_type: THIN_CONTENT,
                severity: IssueSeverity::Low,
                title: "Thin content",
                description: "The page has fewer than 150 words of visible text.",
                recommendation: "Expand the page content or consolidate it elsewhere.",
                evidence: json!({ "wordCount": word_count }),
            });
        }
    }

    if result.images_missing_alt > 0 {
        drafts.push(IssueDraft {
            issue_type: IMAGES_MISSING_ALT,
            severity: IssueSeverity::Low,
            title: "Images without alt text",
            description: "One or more images are missing a non-empty alt attribute.",
            recommendation: "Add descriptive alt text to every content image.",
            evidence: json!({ "imagesMissingAlt": result.images_missing_alt }),
        });
    }

    drafts
}

/// Draft for the cross-page duplicate-title rule, built by the
/// post-processor once all titles of a run are known.
pub fn duplicate_title_draft(title: &str, count: usize, sample_urls: Vec<String>) -> IssueDraft {
    IssueDraft {
        issue_type: DUPLICATE_TITLE,
        severity: IssueSeverity::Medium,
        title: "Duplicate title",
        description: "Multiple pages of the site share the same title.",
        recommendation: "Give every page a unique title.",
        evidence: json!({
            "title": title,
            "count": count,
            "sampleUrls": sample_urls,
        }),
    }
}
