//! Publication-date resolution.
//!
//! Three tiers, first success wins:
//! 1. `rss` - the feed entry carried a parseable date.
//! 2. `meta` - bounded best-effort fetch of the article page, scanning known
//!    meta-tag / microdata / JSON-LD signals in priority order.
//! 3. `fetched` - stamp the current processing time and record it as the
//!    fallback so downstream consumers can tell assumed dates from real ones.
//!
//! The fetch cache is constructed per invocation and passed down the call
//! chain; candidates from different sources pointing at the same article
//! share one fetch and concurrent runs never share state.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

use crate::models::PublishedAtSource;

static META_DATE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    let mut res = Vec::new();
    for key in ["article:published_time", "og:published_time", "article:modified_time"] {
        res.push(meta_content_re("property", key));
        res.push(meta_content_re_rev("property", key));
    }
    for key in ["pubdate", "publishdate", "date", "dc.date"] {
        res.push(meta_content_re("name", key));
        res.push(meta_content_re_rev("name", key));
    }
    res.push(meta_content_re("itemprop", "datePublished"));
    res.push(meta_content_re_rev("itemprop", "datePublished"));
    res
});

static JSON_LD_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""datePublished"\s*:\s*"([^"]+)""#).expect("json-ld regex"));

fn meta_content_re(attr: &str, key: &str) -> Regex {
    Regex::new(&format!(
        r#"(?is)<meta[^>]+{}\s*=\s*["']{}["'][^>]+content\s*=\s*["']([^"']+)["']"#,
        attr,
        regex::escape(key)
    ))
    .expect("meta regex")
}

// Same signal with the content attribute written first.
fn meta_content_re_rev(attr: &str, key: &str) -> Regex {
    Regex::new(&format!(
        r#"(?is)<meta[^>]+content\s*=\s*["']([^"']+)["'][^>]+{}\s*=\s*["']{}["']"#,
        attr,
        regex::escape(key)
    ))
    .expect("meta regex")
}

/// Per-run cache of page-date fetch outcomes keyed by canonical URL.
/// Negative results are cached too so a dead URL is only fetched once.
#[derive(Debug, Default)]
pub struct FetchCache {
    entries: HashMap<String, Option<DateTime<Utc>>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, canonical_url: &str) -> Option<Option<DateTime<Utc>>> {
        self.entries.get(canonical_url).copied()
    }

    fn store(&mut self, canonical_url: &str, result: Option<DateTime<Utc>>) {
        self.entries.insert(canonical_url.to_string(), result);
    }
}

/// Outcome of date resolution for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedDate {
    pub published_at: DateTime<Utc>,
    pub source: PublishedAtSource,
    pub fallback: Option<DateTime<Utc>>,
}

/// Resolve a candidate's publication timestamp through the three tiers.
pub async fn resolve_published_at(
    client: &Client,
    cache: &mut FetchCache,
    canonical_url: &str,
    raw_date: Option<&str>,
    now: DateTime<Utc>,
    timeout: Duration,
    max_bytes: usize,
) -> ResolvedDate {
    if let Some(dt) = raw_date.and_then(parse_date_lenient) {
        return ResolvedDate {
            published_at: dt,
            source: PublishedAtSource::Rss,
            fallback: None,
        };
    }

    let meta = match cache.lookup(canonical_url) {
        Some(cached) => cached,
        None => {
            let fetched = fetch_page_date(client, canonical_url, timeout, max_bytes).await;
            cache.store(canonical_url, fetched);
            fetched
        }
    };
    if let Some(dt) = meta {
        return ResolvedDate {
            published_at: dt,
            source: PublishedAtSource::Meta,
            fallback: None,
        };
    }

    ResolvedDate {
        published_at: now,
        source: PublishedAtSource::Fetched,
        fallback: Some(now),
    }
}

/// Bounded best-effort page fetch. Any failure (network error, timeout,
/// non-HTML response, no recognizable signal) yields `None` and never raises.
async fn fetch_page_date(
    client: &Client,
    url: &str,
    timeout: Duration,
    max_bytes: usize,
) -> Option<DateTime<Utc>> {
    let response = match client.get(url).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("page date fetch failed for {}: {}", url, e);
            return None;
        }
    };
    if !response.status().is_success() {
        return None;
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("html") {
        return None;
    }

    let mut body: Vec<u8> = Vec::new();
    let mut response = response;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                body.extend_from_slice(&chunk);
                if body.len() >= max_bytes {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("page date body read failed for {}: {}", url, e);
                break;
            }
        }
    }

    let html = String::from_utf8_lossy(&body);
    scan_html_for_published(&html)
}

/// Scan an HTML document for publication-date signals in priority order.
pub fn scan_html_for_published(html: &str) -> Option<DateTime<Utc>> {
    for re in META_DATE_RES.iter() {
        if let Some(caps) = re.captures(html) {
            if let Some(dt) = caps.get(1).and_then(|m| parse_date_lenient(m.as_str())) {
                return Some(dt);
            }
        }
    }
    if let Some(caps) = JSON_LD_DATE_RE.captures(html) {
        if let Some(dt) = caps.get(1).and_then(|m| parse_date_lenient(m.as_str())) {
            return Some(dt);
        }
    }
    None
}

/// Parse the date formats feeds and article pages actually emit.
pub fn parse_date_lenient(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offset without a colon, e.g. 2025-01-06T10:00:00+0000
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(DateTime::from_naive_utc_and_offset(
            date.and_hms_opt(0, 0, 0)?,
            Utc,
        ));
    }
    None
}
