//! Core entities owned by a crawl run.
//!
//! A `CrawlRun` is the unit of work and isolation: it exclusively owns the
//! `Page`, `Link`, `Issue` and `Template` rows carrying its id. Status enums
//! are stored as TEXT and encoded by hand for sqlx.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};

/// Lifecycle state of a crawl run.
///
/// Transitions: QUEUED -> RUNNING -> {DONE | FAILED | CANCELED}, plus
/// QUEUED -> CANCELED before dispatch. Terminal states are sinks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlRunStatus {
    Queued,
    Running,
    Done,
    Failed,
    Canceled,
}

impl CrawlRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlRunStatus::Queued => "QUEUED",
            CrawlRunStatus::Running => "RUNNING",
            CrawlRunStatus::Done => "DONE",
            CrawlRunStatus::Failed => "FAILED",
            CrawlRunStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlRunStatus::Done | CrawlRunStatus::Failed | CrawlRunStatus::Canceled
        )
    }
}

impl std::str::FromStr for CrawlRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(CrawlRunStatus::Queued),
            "RUNNING" => Ok(CrawlRunStatus::Running),
            "DONE" => Ok(CrawlRunStatus::Done),
            "FAILED" => Ok(CrawlRunStatus::Failed),
            "CANCELED" => Ok(CrawlRunStatus::Canceled),
            _ => Err(format!("Invalid CrawlRunStatus: {s}")),
        }
    }
}

impl Type<sqlx::Sqlite> for CrawlRunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for CrawlRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> sqlx::encode::IsNull {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for CrawlRunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// Whether a discovered link stays on the crawled site or leaves it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    Internal,
    External,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Internal => "INTERNAL",
            LinkType::External => "EXTERNAL",
        }
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INTERNAL" => Ok(LinkType::Internal),
            "EXTERNAL" => Ok(LinkType::External),
            _ => Err(format!("Invalid LinkType: {s}")),
        }
    }
}

impl Type<sqlx::Sqlite> for LinkType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for LinkType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> sqlx::encode::IsNull {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for LinkType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// Severity attached to a detected issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Low => "LOW",
            IssueSeverity::Medium => "MEDIUM",
            IssueSeverity::High => "HIGH",
            IssueSeverity::Critical => "CRITICAL",
        }
    }
}

impl std::str::FromStr for IssueSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(IssueSeverity::Low),
            "MEDIUM" => Ok(IssueSeverity::Medium),
            "HIGH" => Ok(IssueSeverity::High),
            "CRITICAL" => Ok(IssueSeverity::Critical),
            _ => Err(format!("Invalid IssueSeverity: {s}")),
        }
    }
}

impl Type<sqlx::Sqlite> for IssueSeverity {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for IssueSeverity {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> sqlx::encode::IsNull {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for IssueSeverity {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// A site registered for auditing. The engine reads only the fields the
/// crawl needs; the rest of the project record belongs to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Entry point of the crawl, as entered by the user.
    pub start_url: String,
    /// Registered apex domain, protocol-stripped (e.g. `example.com`).
    pub domain: String,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One crawl of one project: the unit of work pulled off the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: String,
    pub project_id: String,
    pub status: CrawlRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Immutable copy of the project settings taken at enqueue time.
    pub settings_snapshot: serde_json::Value,
    pub totals: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One hop of a redirect chain, as persisted on the page row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub url: String,
    pub status_code: u16,
}

/// One fetched URL within a run. Unique on `(crawl_run_id, normalized_url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub crawl_run_id: String,
    /// The URL as discovered (before normalization).
    pub url: String,
    pub normalized_url: String,
    /// None when the fetch failed before a response arrived.
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1_count: u32,
    pub canonical: Option<String>,
    pub robots_meta: Option<String>,
    /// None for non-HTML or unfetchable pages.
    pub word_count: Option<u32>,
    pub redirect_chain: Vec<RedirectHop>,
    pub template_signature_hash: Option<String>,
    pub template_signature: Option<serde_json::Value>,
    /// Filled by post-processing once templates are clustered.
    pub template_id: Option<String>,
    pub fetch_error: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

/// One outbound navigation edge discovered on a page. Multiplicities are
/// kept: the same target linked twice yields two rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub crawl_run_id: String,
    pub from_page_id: Option<String>,
    pub to_url: String,
    pub to_normalized_url: Option<String>,
    pub link_type: LinkType,
    pub is_broken: bool,
    /// Status of the target, filled by the post-processor for internal
    /// links whose target was crawled.
    pub status_code: Option<u16>,
}

/// A detected problem, either tied to one page or global to the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub crawl_run_id: String,
    pub page_id: Option<String>,
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub evidence: serde_json::Value,
}

/// A cluster of pages sharing a structural signature within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub crawl_run_id: String,
    pub signature_hash: String,
    pub signature: serde_json::Value,
    pub sample_page_id: String,
    pub page_count: u64,
}

/// Everything the fetcher learned about one URL. Fetch failures are data,
/// not errors: the page is persisted either way so it shows up in reports.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    /// Final URL after following redirects.
    pub url: String,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1_count: u32,
    pub canonical: Option<String>,
    pub robots_meta: Option<String>,
    pub word_count: Option<u32>,
    pub redirect_chain: Vec<RedirectHop>,
    /// Raw `a[href]` values in document order.
    pub links: Vec<String>,
    pub images_missing_alt: u32,
    pub html: Option<String>,
    pub error: Option<String>,
}
