//! Feed fetching and lenient RSS/Atom extraction.
//!
//! The parser is deliberately not a validating XML parser: real-world feeds
//! mix RSS 2.0 and Atom forms, wrap text in CDATA, leave entities half
//! encoded and carry namespaced tags. Tag scanning with precompiled regexes
//! tolerates all of that; an entry that still lacks a title or link is
//! silently dropped and the rest of the feed survives.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

use crate::models::RawEntry;

static RSS_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>").expect("item regex"));
static ATOM_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>").expect("entry regex"));

static TITLE_RES: Lazy<Vec<Regex>> = Lazy::new(|| tag_regexes(&["title"]));
static SUMMARY_RES: Lazy<Vec<Regex>> =
    Lazy::new(|| tag_regexes(&["description", "summary", "content", "content:encoded"]));
static DATE_RES: Lazy<Vec<Regex>> =
    Lazy::new(|| tag_regexes(&["pubDate", "published", "updated", "dc:date", "dc:created"]));

/// RSS `<link>text</link>` form.
static LINK_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<link(?:\s[^>]*)?>(.*?)</link\s*>").expect("link regex"));
/// Atom `<link href="..."/>` form.
static LINK_HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<link\s[^>]*?href\s*=\s*["']([^"']+)["']"#).expect("link href regex")
});

static CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<!\[CDATA\[(.*?)\]\]>").expect("cdata regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"));
static NUMERIC_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(?:x([0-9a-fA-F]+)|([0-9]+));").expect("entity regex"));

fn tag_regexes(tags: &[&str]) -> Vec<Regex> {
    tags.iter()
        .map(|t| {
            Regex::new(&format!(
                r"(?is)<{0}(?:\s[^>]*)?>(.*?)</{0}\s*>",
                regex::escape(t)
            ))
            .expect("tag regex")
        })
        .collect()
}

/// Fetches the raw feed body from the given URL.
/// Retries server errors and rate limits with exponential backoff; client
/// errors are treated as permanent.
pub async fn fetch_feed_body(client: &Client, url: &str) -> Result<String> {
    let max_retries = 3;
    let mut last_error = None;

    for attempt in 1..=max_retries {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s
            tracing::info!(
                "Retrying feed fetch for {} (attempt {}/{}) after {:?}...",
                url,
                attempt,
                max_retries,
                backoff
            );
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let body = response
                        .text()
                        .await
                        .context("failed to read feed response body")?;
                    return Ok(body);
                } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                    continue;
                } else {
                    // Client error (4xx) - likely permanent, don't retry
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Extract raw candidate entries from a feed body. `<item>` blocks are tried
/// first (RSS); if the document has none, `<entry>` blocks (Atom). Entries
/// missing a title or link are dropped.
pub fn parse_feed(xml: &str) -> Vec<RawEntry> {
    let mut blocks: Vec<&str> = RSS_ITEM_RE
        .captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if blocks.is_empty() {
        blocks = ATOM_ENTRY_RE
            .captures_iter(xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
    }

    let mut entries = Vec::new();
    for block in blocks {
        let title = first_tag_text(&TITLE_RES, block).unwrap_or_default();
        let url = extract_link(block).unwrap_or_default();
        if title.is_empty() || url.is_empty() {
            tracing::debug!("dropping feed entry without title or link");
            continue;
        }

        let summary = first_tag_text(&SUMMARY_RES, block).filter(|s| !s.is_empty());
        let published_raw = first_date_text(block);

        entries.push(RawEntry {
            title,
            url,
            summary,
            published_raw,
        });
    }
    entries
}

/// First matching tag from the priority list wins.
fn first_tag_text(regexes: &[Regex], block: &str) -> Option<String> {
    for re in regexes {
        if let Some(caps) = re.captures(block) {
            let text = clean_text(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn first_date_text(block: &str) -> Option<String> {
    for re in DATE_RES.iter() {
        if let Some(caps) = re.captures(block) {
            let text = unwrap_cdata(caps.get(1).map(|m| m.as_str()).unwrap_or(""))
                .trim()
                .to_string();
            if !text.is_empty() {
                return Some(decode_entities(&text));
            }
        }
    }
    None
}

/// The RSS text form is preferred; Atom's `href` attribute is the fallback
/// (a self-closing `<link .../>` never matches the text form).
fn extract_link(block: &str) -> Option<String> {
    if let Some(caps) = LINK_TEXT_RE.captures(block) {
        let text = clean_text(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
        if !text.is_empty() {
            return Some(text);
        }
    }
    if let Some(caps) = LINK_HREF_RE.captures(block) {
        let href = decode_entities(caps.get(1).map(|m| m.as_str()).unwrap_or("")).trim().to_string();
        if !href.is_empty() {
            return Some(href);
        }
    }
    None
}

fn clean_text(raw: &str) -> String {
    let unwrapped = unwrap_cdata(raw);
    let stripped = TAG_RE.replace_all(&unwrapped, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn unwrap_cdata(s: &str) -> String {
    if let Some(caps) = CDATA_RE.captures(s) {
        caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string()
    } else {
        s.to_string()
    }
}

/// Decode the small set of named entities feeds actually use, plus numeric
/// forms. `&amp;` is replaced last so `&amp;lt;` does not double-decode.
pub fn decode_entities(s: &str) -> String {
    let decoded = NUMERIC_ENTITY_RE.replace_all(s, |caps: &regex::Captures| {
        let code = if let Some(hex_digits) = caps.get(1) {
            u32::from_str_radix(hex_digits.as_str(), 16).ok()
        } else {
            caps.get(2).and_then(|d| d.as_str().parse::<u32>().ok())
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    decoded
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
