//! Sitemap resolution: turn a sitemap URL into a bounded, deduplicated list
//! of page URLs, following sitemap indexes depth-first.

use crate::acquisition::http_client::HttpClient;
use crate::error::PipelineError;
use quick_xml::events::Event;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

/// Time box for fetching one sitemap document.
pub const SITEMAP_TIMEOUT_MS: u64 = 30_000;

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// Leaf sitemap: `<urlset><url><loc>`.
    UrlSet(Vec<String>),
    /// Index of other sitemaps: `<sitemapindex><sitemap><loc>`. Locations may be relative.
    Index(Vec<String>),
}

/// Parse a `urlset` or `sitemapindex` document.
///
/// Elements are matched on their local name, so prefixed namespaces
/// (`<s:urlset>`) parse the same as the default namespace.
pub fn parse_sitemap(xml: &str, source_name: &str) -> Result<SitemapDocument, PipelineError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root: Option<String> = None;
    let mut path: Vec<String> = Vec::new();
    let mut locations = Vec::new();
    let mut current_loc = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if root.is_none() {
                    root = Some(name.clone());
                }
                if name == "loc" {
                    current_loc.clear();
                }
                path.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_entry_loc(&path) {
                    let text = e
                        .unescape()
                        .map_err(|err| PipelineError::parse(source_name, err))?;
                    current_loc.push_str(text.trim());
                }
            }
            Ok(Event::CData(ref e)) => {
                if in_entry_loc(&path) {
                    current_loc.push_str(String::from_utf8_lossy(e).trim());
                }
            }
            Ok(Event::End(_)) => {
                if in_entry_loc(&path) && !current_loc.is_empty() {
                    locations.push(std::mem::take(&mut current_loc));
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PipelineError::parse(source_name, e)),
            _ => {}
        }
    }

    match root.as_deref() {
        Some("urlset") => Ok(SitemapDocument::UrlSet(locations)),
        Some("sitemapindex") => Ok(SitemapDocument::Index(locations)),
        Some(other) => Err(PipelineError::parse(
            source_name,
            format!("unexpected root element <{other}>"),
        )),
        None => Err(PipelineError::parse(source_name, "empty document")),
    }
}

/// True when the element path ends in `url/loc` or `sitemap/loc`.
fn in_entry_loc(path: &[String]) -> bool {
    match path {
        [.., parent, last] if last == "loc" => parent == "url" || parent == "sitemap",
        _ => false,
    }
}

/// Validate a `<loc>` value as an absolute http(s) URL, dropping any fragment.
pub fn normalize_location(loc: &str) -> Option<Url> {
    let mut url = Url::parse(loc.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Resolve `sitemap_url` into at most `max_pages` distinct page URLs.
///
/// A root sitemap that cannot be fetched or parsed fails the resolution.
/// Nested sitemaps that fail are logged and skipped. Zero collected URLs is
/// a warning, not an error.
pub async fn resolve_sitemap(
    client: &HttpClient,
    sitemap_url: &str,
    max_pages: usize,
) -> Result<Vec<Url>, PipelineError> {
    let root = Url::parse(sitemap_url).map_err(|e| PipelineError::validation("sitemap url", e))?;

    let mut resolution = Resolution::new(max_pages);
    resolution.run(client, root).await?;

    info!(
        "resolved {} urls from {} sitemap(s) ({} locations dropped)",
        resolution.urls.len(),
        resolution.visited.len(),
        resolution.dropped
    );
    if resolution.urls.is_empty() {
        warn!("sitemap {sitemap_url} yielded no page urls");
    }

    Ok(resolution.urls)
}

/// State of one resolve call. Nothing here outlives it.
struct Resolution {
    max_pages: usize,
    visited: HashSet<String>,
    seen: HashSet<String>,
    urls: Vec<Url>,
    dropped: usize,
}

impl Resolution {
    fn new(max_pages: usize) -> Self {
        Self {
            max_pages,
            visited: HashSet::new(),
            seen: HashSet::new(),
            urls: Vec::new(),
            dropped: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.urls.len() >= self.max_pages
    }

    async fn run(&mut self, client: &HttpClient, root: Url) -> Result<(), PipelineError> {
        // Children are pushed in reverse so they pop in document order.
        let mut stack = vec![(root, true)];

        while let Some((sitemap, is_root)) = stack.pop() {
            if self.is_full() {
                break;
            }
            if !self.visited.insert(sitemap.to_string()) {
                debug!("skipping already visited sitemap {sitemap}");
                continue;
            }

            let document = match fetch_document(client, &sitemap).await {
                Ok(doc) => doc,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!("skipping nested sitemap: {e}");
                    continue;
                }
            };

            match document {
                SitemapDocument::UrlSet(locations) => {
                    for loc in locations {
                        if self.is_full() {
                            break;
                        }
                        self.push_location(&loc);
                    }
                }
                SitemapDocument::Index(children) => {
                    let resolved: Vec<Url> = children
                        .iter()
                        .filter_map(|child| match sitemap.join(child) {
                            Ok(url) => Some(url),
                            Err(e) => {
                                warn!("ignoring sitemap reference {child}: {e}");
                                None
                            }
                        })
                        .collect();
                    stack.extend(resolved.into_iter().rev().map(|url| (url, false)));
                }
            }
        }

        Ok(())
    }

    fn push_location(&mut self, loc: &str) {
        let Some(url) = normalize_location(loc) else {
            debug!("dropping malformed location {loc}");
            self.dropped += 1;
            return;
        };
        if self.seen.insert(url.to_string()) {
            self.urls.push(url);
        } else {
            self.dropped += 1;
        }
    }
}

async fn fetch_document(client: &HttpClient, sitemap: &Url) -> Result<SitemapDocument, PipelineError> {
    let resp = client
        .get(sitemap.as_str(), SITEMAP_TIMEOUT_MS)
        .await
        .map_err(|e| PipelineError::fetch(sitemap.as_str(), format!("{e:#}")))?;
    if !resp.is_success() {
        return Err(PipelineError::fetch(
            sitemap.as_str(),
            format!("HTTP status {}", resp.status),
        ));
    }
    debug!("fetched sitemap {sitemap} ({} bytes)", resp.body.len());
    parse_sitemap(&resp.body, sitemap.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url><loc>https://example.com/</loc><lastmod>2026-01-01</lastmod></url>
            <url><loc> https://example.com/about?a=1&amp;b=2 </loc></url>
            <url><loc><![CDATA[https://example.com/cdata]]></loc></url>
        </urlset>"#;

        let doc = parse_sitemap(xml, "test").unwrap();
        assert_eq!(
            doc,
            SitemapDocument::UrlSet(vec![
                "https://example.com/".into(),
                "https://example.com/about?a=1&b=2".into(),
                "https://example.com/cdata".into(),
            ])
        );
    }

    #[test]
    fn test_parse_index_with_prefix() {
        let xml = r#"<s:sitemapindex xmlns:s="http://www.sitemaps.org/schemas/sitemap/0.9">
            <s:sitemap><s:loc>/sitemap-posts.xml</s:loc></s:sitemap>
            <s:sitemap><s:loc>https://cdn.example.com/pages.xml</s:loc></s:sitemap>
        </s:sitemapindex>"#;

        let doc = parse_sitemap(xml, "test").unwrap();
        assert_eq!(
            doc,
            SitemapDocument::Index(vec![
                "/sitemap-posts.xml".into(),
                "https://cdn.example.com/pages.xml".into(),
            ])
        );
    }

    #[test]
    fn test_parse_rejects_other_documents() {
        assert!(matches!(
            parse_sitemap("<html><body></body></html>", "test"),
            Err(PipelineError::Parse { .. })
        ));
        assert!(matches!(
            parse_sitemap("<urlset><url><loc>x</url></urlset>", "test"),
            Err(PipelineError::Parse { .. })
        ));
        assert!(parse_sitemap("", "test").is_err());
    }

    #[test]
    fn test_loc_outside_entry_ignored() {
        let xml = "<urlset><loc>https://example.com/stray</loc><url><loc>https://example.com/a</loc></url></urlset>";
        let doc = parse_sitemap(xml, "test").unwrap();
        assert_eq!(doc, SitemapDocument::UrlSet(vec!["https://example.com/a".into()]));
    }

    #[test]
    fn test_normalize_location() {
        assert_eq!(
            normalize_location("https://example.com/page#top").unwrap().as_str(),
            "https://example.com/page"
        );
        assert!(normalize_location("/relative/path").is_none());
        assert!(normalize_location("mailto:someone@example.com").is_none());
        assert!(normalize_location("ftp://example.com/file").is_none());
        assert!(normalize_location("not a url").is_none());
    }
}
