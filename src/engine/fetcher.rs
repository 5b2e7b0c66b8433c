//! Page fetching and SEO field extraction.
//!
//! Redirects are followed by hand so every hop lands in the page's
//! redirect chain; the reqwest client is built with redirects disabled.
//! Transport failures do not abort the crawl: they come back as a
//! `PageResult` with no status code and the error message attached.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::domain::entities::{PageResult, RedirectHop};
use crate::domain::repositories::PageFetcher;

pub const MAX_REDIRECTS: usize = 10;

static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static META_DESCRIPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static META_ROBOTS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="robots"]"#).unwrap());
static CANONICAL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());
static H1_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Fields pulled out of one HTML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1_count: u32,
    pub canonical: Option<String>,
    pub robots_meta: Option<String>,
    pub word_count: u32,
    pub images_missing_alt: u32,
    /// Raw `a[href]` values in document order.
    pub links: Vec<String>,
}

/// Extract SEO fields and outbound hrefs from an HTML document.
pub fn extract_page_fields(html: &str) -> ExtractedFields {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let meta_description = document
        .select(&META_DESCRIPTION_SELECTOR)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let robots_meta = document
        .select(&META_ROBOTS_SELECTOR)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let canonical = document
        .select(&CANONICAL_SELECTOR)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let h1_count = document.select(&H1_SELECTOR).count() as u32;

    let links = document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|el| el.value().attr("href"))
        .map(|href| href.to_string())
        .collect();

    let images_missing_alt = document
        .select(&IMG_SELECTOR)
        .filter(|el| {
            el.value()
                .attr("alt")
                .map(|alt| alt.trim().is_empty())
                .unwrap_or(true)
        })
        .count() as u32;

    let word_count = document
        .select(&BODY_SELECTOR)
        .next()
        .map(|body| {
            let mut text = String::new();
            collect_visible_text(body, &mut text);
            text.split_whitespace().count() as u32
        })
        .unwrap_or(0);

    ExtractedFields {
        title,
        meta_description,
        h1_count,
        canonical,
        robots_meta,
        word_count,
        images_missing_alt,
        links,
    }
}

/// Body text minus script/style/template/noscript subtrees.
fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if !matches!(
                child_el.value().name(),
                "script" | "style" | "template" | "noscript"
            ) {
                collect_visible_text(child_el, out);
            }
        }
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

/// HTTP implementation of the fetcher seam. One instance per run: the
/// client carries the run's user agent and timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> PageResult {
        let mut current = url.to_string();
        let mut chain: Vec<RedirectHop> = Vec::new();

        loop {
            let response = match self.client.get(&current).send().await {
                Ok(response) => response,
                Err(e) => {
                    return PageResult {
                        url: current,
                        status_code: None,
                        redirect_chain: chain,
                        error: Some(describe_fetch_error(&e)),
                        ..Default::default()
                    };
                }
            };

            let status = response.status().as_u16();

            if (300..400).contains(&status) {
                if let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    let next = Url::parse(&current)
                        .ok()
                        .and_then(|base| base.join(location).ok());
                    let next = match next {
                        Some(next) => next.to_string(),
                        None => {
                            return PageResult {
                                url: current,
                                status_code: Some(status),
                                redirect_chain: chain,
                                error: Some(format!("unresolvable redirect target: {location}")),
                                ..Default::default()
                            };
                        }
                    };

                    chain.push(RedirectHop {
                        url: current,
                        status_code: status,
                    });
                    if chain.len() >= MAX_REDIRECTS {
                        return PageResult {
                            url: next,
                            status_code: Some(status),
                            redirect_chain: chain,
                            error: Some(format!("redirect cap of {MAX_REDIRECTS} exceeded")),
                            ..Default::default()
                        };
                    }
                    current = next;
                    continue;
                }
                // 3xx without a Location header falls through as final.
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let is_html = content_type
                .as_deref()
                .map(is_html_content_type)
                .unwrap_or(false);

            if !is_html {
                return PageResult {
                    url: current,
                    status_code: Some(status),
                    content_type,
                    redirect_chain: chain,
                    ..Default::default()
                };
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    return PageResult {
                        url: current,
                        status_code: Some(status),
                        content_type,
                        redirect_chain: chain,
                        error: Some(describe_fetch_error(&e)),
                        ..Default::default()
                    };
                }
            };

            let fields = extract_page_fields(&body);
            return PageResult {
                url: current,
                status_code: Some(status),
                content_type,
                title: fields.title,
                meta_description: fields.meta_description,
                h1_count: fields.h1_count,
                canonical: fields.canonical,
                robots_meta: fields.robots_meta,
                word_count: Some(fields.word_count),
                redirect_chain: chain,
                links: fields.links,
                images_missing_alt: fields.images_missing_alt,
                html: Some(body),
                error: None,
            };
        }
    }
}

fn describe_fetch_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"
<html>
<head>
    <title>  Acme Widgets — Home  </title>
    <meta name="description" content="The widget specialists.">
    <meta name="robots" content="index, follow">
    <link rel="canonical" href="https://a.test/">
</head>
<body>
    <h1>Widgets</h1>
    <p>We sell widgets of every size and color.</p>
    <a href="/shop">Shop</a>
    <a href="/about">About</a>
    <a href="https://other.test/partner">Partner</a>
    <img src="/logo.png" alt="Acme logo">
    <img src="/decor.png" alt="">
    <img src="/banner.png">
    <script>var hidden = "these words do not count";</script>
    <noscript>Enable JavaScript please</noscript>
</body>
</html>
"#;

    #[test]
    fn test_field_extraction() {
        let fields = extract_page_fields(SAMPLE_PAGE);
        assert_eq!(fields.title.as_deref(), Some("Acme Widgets — Home"));
        assert_eq!(
            fields.meta_description.as_deref(),
            Some("The widget specialists.")
        );
        assert_eq!(fields.robots_meta.as_deref(), Some("index, follow"));
        assert_eq!(fields.canonical.as_deref(), Some("https://a.test/"));
        assert_eq!(fields.h1_count, 1);
        assert_eq!(
            fields.links,
            vec!["/shop", "/about", "https://other.test/partner"]
        );
    }

    #[test]
    fn test_images_missing_alt_counts_empty_and_absent() {
        let fields = extract_page_fields(SAMPLE_PAGE);
        assert_eq!(fields.images_missing_alt, 2);
    }

    #[test]
    fn test_word_count_skips_hidden_text() {
        let fields = extract_page_fields(SAMPLE_PAGE);
        // "Widgets" + "We sell widgets of every size and color." + the three
        // link texts; script and noscript content excluded.
        assert_eq!(fields.word_count, 12);
    }

    #[test]
    fn test_empty_fields_become_none() {
        let fields = extract_page_fields("<html><head><title>   </title></head><body></body></html>");
        assert_eq!(fields.title, None);
        assert_eq!(fields.meta_description, None);
        assert_eq!(fields.canonical, None);
        assert_eq!(fields.h1_count, 0);
        assert!(fields.links.is_empty());
    }

    #[test]
    fn test_first_title_wins() {
        let fields =
            extract_page_fields("<html><head><title>First</title><title>Second</title></head><body></body></html>");
        assert_eq!(fields.title.as_deref(), Some("First"));
    }

    #[test]
    fn test_is_html_content_type() {
        assert!(is_html_content_type("text/html"));
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("Text/HTML"));
        assert!(!is_html_content_type("application/json"));
        assert!(!is_html_content_type("application/pdf"));
    }
}
