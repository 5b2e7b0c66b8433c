//! Structural fingerprinting of HTML documents.
//!
//! Pages rendered from the same template share a layout even when their
//! content differs, so the signature looks only at structure: tag
//! positions, landmark counts, and a curated sample of class tokens. The
//! hash over the canonical JSON form is the clustering key.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const MAX_TOP_LEVEL_TAGS: usize = 30;
const MAX_SKELETON_NODES: usize = 150;
const MAX_CLASS_TOKENS: usize = 15;
const MAX_TOKEN_LEN: usize = 20;

/// Subtrees removed before any structural measurement.
const SKIPPED_TAGS: [&str; 5] = ["script", "style", "noscript", "svg", "iframe"];

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static HEX_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{8,}$").unwrap());

/// Content-independent structural fingerprint of one document.
///
/// Field order is the canonical JSON key order; do not reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSignature {
    /// Tag names of the first 30 direct children of `<body>`.
    pub body_top_level_tags: Vec<String>,
    pub landmark_counts: LandmarkCounts,
    pub form_elements: FormElementCounts,
    pub link_stats: LinkStats,
    /// `>`-joined tag paths from body for the first 150 body descendants.
    pub dom_skeleton_sample: Vec<String>,
    /// Up to 15 unique filtered class tokens, sorted.
    pub class_tokens_sample: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkCounts {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub header: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub nav: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub main: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub footer: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub section: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub article: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub form: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormElementCounts {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub input: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub button: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub select: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub textarea: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStats {
    pub total_links: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn is_skipped(tag: &str) -> bool {
    SKIPPED_TAGS.contains(&tag)
}

/// Compute `(signature_hash, signature)` for an HTML document.
///
/// Byte-stable: a fixed input yields the same hash across runs and
/// processes.
pub fn compute(html: &str) -> (String, TemplateSignature) {
    let document = Html::parse_document(html);
    let mut signature = TemplateSignature {
        body_top_level_tags: Vec::new(),
        landmark_counts: LandmarkCounts::default(),
        form_elements: FormElementCounts::default(),
        link_stats: LinkStats::default(),
        dom_skeleton_sample: Vec::new(),
        class_tokens_sample: Vec::new(),
    };

    if let Some(body) = document.select(&BODY_SELECTOR).next() {
        let mut path = vec!["body".to_string()];
        walk_body(body, &mut path, &mut signature);
    }

    let mut tokens = TokenSampler::default();
    walk_stats(document.root_element(), &mut signature, &mut tokens);
    signature.class_tokens_sample = tokens.finish();

    (hash_signature(&signature), signature)
}

/// Hash the canonical JSON form: serde struct order, zero counts omitted.
fn hash_signature(signature: &TemplateSignature) -> String {
    let canonical = serde_json::to_vec(signature).expect("signature always serializes");
    let digest = Sha256::digest(&canonical);
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Collect body-relative structure: top-level tags and the DOM skeleton.
fn walk_body(element: ElementRef<'_>, path: &mut Vec<String>, out: &mut TemplateSignature) {
    for child in element.children().filter_map(ElementRef::wrap) {
        let name = child.value().name().to_string();
        if is_skipped(&name) {
            continue;
        }

        if path.len() == 1 && out.body_top_level_tags.len() < MAX_TOP_LEVEL_TAGS {
            out.body_top_level_tags.push(name.clone());
        }

        if out.dom_skeleton_sample.len() < MAX_SKELETON_NODES {
            out.dom_skeleton_sample
                .push(format!("{}>{}", path.join(">"), name));
        }

        path.push(name);
        walk_body(child, path, out);
        path.pop();
    }
}

#[derive(Default)]
struct TokenSampler {
    tokens: Vec<String>,
    seen: HashSet<String>,
}

impl TokenSampler {
    /// Admit tokens in document order until the sample is full, then sort.
    fn offer(&mut self, raw: &str) {
        if self.tokens.len() >= MAX_CLASS_TOKENS {
            return;
        }
        let token = raw.trim().to_lowercase();
        if token.chars().count() < 2
            || token.chars().all(|c| c.is_ascii_digit())
            || HEX_TOKEN.is_match(&token)
            || token.starts_with('_')
        {
            return;
        }
        let token: String = token.chars().take(MAX_TOKEN_LEN).collect();
        if self.seen.insert(token.clone()) {
            self.tokens.push(token);
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.tokens.sort();
        self.tokens
    }
}

/// Count landmarks, form elements, and links over the pre-cleaned document.
fn walk_stats(element: ElementRef<'_>, out: &mut TemplateSignature, tokens: &mut TokenSampler) {
    for child in element.children().filter_map(ElementRef::wrap) {
        let name = child.value().name();
        if is_skipped(name) {
            continue;
        }

        match name {
            "header" => out.landmark_counts.header += 1,
            "nav" => out.landmark_counts.nav += 1,
            "main" => out.landmark_counts.main += 1,
            "footer" => out.landmark_counts.footer += 1,
            "section" => out.landmark_counts.section += 1,
            "article" => out.landmark_counts.article += 1,
            "form" => out.landmark_counts.form += 1,
            "input" => out.form_elements.input += 1,
            "button" => out.form_elements.button += 1,
            "select" => out.form_elements.select += 1,
            "textarea" => out.form_elements.textarea += 1,
            "a" => {
                if child.value().attr("href").is_some() {
                    out.link_stats.total_links += 1;
                }
            }
            _ => {}
        }

        if let Some(class) = child.value().attr("class") {
            for token in class.split_whitespace() {
                tokens.offer(token);
            }
        }

        walk_stats(child, out, tokens);
    }
}
