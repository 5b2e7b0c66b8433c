//! Aggregate statistics persisted on the run row as JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An internal error page ranked by how many internal links point at it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopErrorPage {
    pub url: String,
    pub status_code: u16,
    pub count: u64,
}

/// One entry of the top-issue-types ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopIssueType {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub count: u64,
}

/// The final totals shape written by the post-processor. `BTreeMap` keeps
/// the serialized key order stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrawlTotals {
    pub pages_count: u64,
    pub links_count: u64,
    pub internal_links_count: u64,
    pub external_links_count: u64,
    pub broken_internal_links_count: u64,

    /// Map from stringified status code to page count. Pages that never got
    /// a response are bucketed under "0" so the values always sum to
    /// `pages_count`.
    pub status_code_distribution: BTreeMap<String, u64>,

    /// Top 10 internal targets with status >= 400, by descending in-link
    /// count, ties broken by URL ascending.
    pub top_error_pages: Vec<TopErrorPage>,

    pub issue_count_total: u64,
    pub issue_count_by_type: BTreeMap<String, u64>,
    pub issue_count_by_severity: BTreeMap<String, u64>,

    /// Top 10 issue types by count, ties broken by type name ascending.
    pub top_issue_types: Vec<TopIssueType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
}

impl CrawlTotals {
    /// Parse the totals column, treating an empty object as the default.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}
