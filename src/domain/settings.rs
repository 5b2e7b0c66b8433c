//! Crawl settings, read from the run's settings snapshot.
//!
//! Every field has a default so a snapshot written by an older control
//! plane still parses. Keys the engine does not know are preserved on read
//! (they travel with the snapshot) but never written back: `Serialize` is
//! implemented by hand over the known keys only.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

pub const DEFAULT_USER_AGENT: &str = "HydraFrogBot/1.0";

/// Per-project crawl configuration, snapshotted onto the run at enqueue.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSettings {
    /// Hard cap on distinct normalized URLs admitted to the frontier.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// URLs discovered deeper than this are never admitted.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Query parameter names stripped during URL normalization.
    #[serde(default = "default_ignore_params")]
    pub ignore_params: Vec<String>,

    /// Sleep between page iterations, in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Treat `*.domain` hosts as internal.
    #[serde(default)]
    pub include_subdomains: bool,

    /// Reserved: honored by the fetcher once robots.txt support lands.
    #[serde(default = "default_true")]
    pub respect_robots: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Unknown snapshot keys, kept so a read-modify-write elsewhere cannot
    /// drop them. Never serialized by the engine.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Serialize for CrawlSettings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CrawlSettings", 7)?;
        state.serialize_field("maxPages", &self.max_pages)?;
        state.serialize_field("maxDepth", &self.max_depth)?;
        state.serialize_field("ignoreParams", &self.ignore_params)?;
        state.serialize_field("throttleMs", &self.throttle_ms)?;
        state.serialize_field("includeSubdomains", &self.include_subdomains)?;
        state.serialize_field("respectRobots", &self.respect_robots)?;
        state.serialize_field("userAgent", &self.user_agent)?;
        state.end()
    }
}

fn default_max_pages() -> u32 {
    1000
}

fn default_max_depth() -> u32 {
    5
}

fn default_ignore_params() -> Vec<String> {
    [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_content",
        "utm_term",
        "fbclid",
        "gclid",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_throttle_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for CrawlSettings {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(Default::default()))
            .expect("defaults always deserialize")
    }
}

impl CrawlSettings {
    /// Parse a settings snapshot, falling back to defaults for missing keys.
    pub fn from_snapshot(snapshot: &serde_json::Value) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(snapshot.clone())?)
    }
}
