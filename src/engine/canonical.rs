//! URL normalization and internal/external classification.
//!
//! The normalized form is the equality key for pages within a run: two
//! URLs that differ only in fragment, ignored query parameters, default
//! port, host case, or query key order must collapse to one string.

use std::collections::HashSet;
use url::Url;

/// Normalizes URLs against a fixed set of ignored query parameter names.
/// Built once per run from the settings snapshot.
#[derive(Debug, Clone)]
pub struct UrlCanonicalizer {
    ignore_params: HashSet<String>,
}

impl UrlCanonicalizer {
    pub fn new(ignore_params: &[String]) -> Self {
        Self {
            ignore_params: ignore_params.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Produce the canonical string form of a raw URL, or `None` when the
    /// input does not parse as an http(s) URL.
    ///
    /// Idempotent: `normalize(normalize(u)) == normalize(u)`.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let mut url = Url::parse(raw.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        // The parser already lower-cases the host and drops default ports.
        url.set_fragment(None);

        let mut kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !self.ignore_params.contains(&name.to_lowercase()))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            // Stable sort keeps discovery order for repeated names.
            kept.sort_by(|a, b| a.0.cmp(&b.0));
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (name, value) in &kept {
                pairs.append_pair(name, value);
            }
        }

        let path = url.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            url.set_path(path.trim_end_matches('/'));
        }

        Some(url.to_string())
    }

    /// Resolve a candidate href against a base URL, then normalize.
    pub fn resolve_and_normalize(&self, href: &str, base: &str) -> Option<String> {
        let base = Url::parse(base).ok()?;
        let resolved = base.join(href.trim()).ok()?;
        self.normalize(resolved.as_str())
    }
}

/// Whether a normalized URL belongs to the crawled site.
///
/// Internal iff the host equals the base domain, or `include_subdomains`
/// is set and the host ends with `"." + base_domain`. Case-insensitive.
pub fn is_internal(normalized_url: &str, base_domain: &str, include_subdomains: bool) -> bool {
    let host = match Url::parse(normalized_url).ok().and_then(|u| {
        u.host_str().map(|h| h.to_lowercase())
    }) {
        Some(host) => host,
        None => return false,
    };
    let base = base_domain.to_lowercase();

    host == base || (include_subdomains && host.ends_with(&format!(".{base}")))
}
