//! Candidate normalization: canonical URLs, content hashes, title token sets
//! and the clickbait flag. Everything here is pure and deterministic; the
//! clusterer and persistence layer both depend on these derived fields.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Query parameters stripped during canonicalization. `utm_` is matched as a
/// prefix, the rest exactly.
const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid"];

/// Canonicalize a URL for exact-duplicate comparison:
/// - strip known tracking query parameters
/// - sort the surviving query pairs for stable comparison
/// - clear the fragment
/// - lowercase the host
///
/// Returns `None` when the URL does not parse or has no host; such candidates
/// cannot be deduplicated and are dropped before clustering.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    url.set_host(Some(&host)).ok()?;

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.set_query(Some(&query));
    }

    url.set_fragment(None);
    Some(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of the Unicode-normalized (NFKC), lowercased, punctuation-stripped
/// title. Used both as an exact near-duplicate key during clustering and as
/// the persisted `normalized_hash`. Falls back to the raw lowercased title
/// when normalization strips everything (e.g. an all-symbol title).
pub fn normalized_title_hash(title: &str) -> String {
    let normalized: String = title
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    let basis = if collapsed.is_empty() {
        title.trim().to_lowercase()
    } else {
        collapsed
    };
    sha256_hex(&basis)
}

/// Title token set for Jaccard similarity: letters/numbers/space only,
/// whitespace-split, empty tokens dropped. Transient; never persisted.
pub fn title_token_set(title: &str) -> HashSet<String> {
    title
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Case-insensitive substring match against the configured keyword list.
/// The settings loader lowercases keywords once at startup.
pub fn matches_keyword(title: &str, keywords: &[String]) -> bool {
    let haystack = title.to_lowercase();
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}

/// The uniqueness key for persisted items: one story from one source.
pub fn dedupe_hash(source_key: &str, canonical_url: &str) -> String {
    sha256_hex(&format!("{}|{}", source_key, canonical_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_is_idempotent() {
        let raw = "HTTPS://Example.COM/a/b?z=2&a=1#frag";
        let once = canonicalize_url(raw).expect("canonical");
        let twice = canonicalize_url(&once).expect("canonical again");
        assert_eq!(once, twice);
        assert!(once.starts_with("https://example.com/a/b"));
        assert!(!once.contains('#'));
    }

    #[test]
    fn tracking_params_do_not_change_canonical_url() {
        let plain = canonicalize_url("https://example.com/story?id=7").unwrap();
        let tracked = canonicalize_url(
            "https://example.com/story?utm_source=x&utm_medium=y&gclid=abc&fbclid=def&id=7",
        )
        .unwrap();
        assert_eq!(plain, tracked);
    }

    #[test]
    fn query_params_are_sorted() {
        let a = canonicalize_url("https://example.com/p?b=2&a=1").unwrap();
        let b = canonicalize_url("https://example.com/p?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unparseable_url_is_rejected() {
        assert!(canonicalize_url("not a url at all").is_none());
        assert!(canonicalize_url("").is_none());
        assert!(canonicalize_url("/relative/path").is_none());
    }

    #[test]
    fn title_hash_ignores_punctuation_and_case() {
        let a = normalized_title_hash("Company X launches product!");
        let b = normalized_title_hash("company x launches product");
        assert_eq!(a, b);
    }

    #[test]
    fn title_hash_falls_back_for_symbol_only_titles() {
        let a = normalized_title_hash("!!!");
        let b = normalized_title_hash("???");
        // Both normalize to empty; the raw lowercased fallback keeps them apart.
        assert_ne!(a, b);
    }

    #[test]
    fn token_set_splits_on_non_alphanumerics() {
        let tokens = title_token_set("Company-X launches: product 2.0");
        assert!(tokens.contains("company"));
        assert!(tokens.contains("x"));
        assert!(tokens.contains("launches"));
        assert!(tokens.contains("product"));
        assert!(tokens.contains("2"));
        assert!(tokens.contains("0"));
        assert!(!tokens.contains(""));
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let keywords = vec!["shocking".to_string(), "you won't believe".to_string()];
        assert!(matches_keyword("SHOCKING result in finals", &keywords));
        assert!(matches_keyword("You Won't Believe what he said", &keywords));
        assert!(!matches_keyword("Quiet day on the markets", &keywords));
    }

    #[test]
    fn dedupe_hash_separates_sources() {
        let url = "https://example.com/story";
        assert_ne!(dedupe_hash("feed_a", url), dedupe_hash("feed_b", url));
        assert_eq!(dedupe_hash("feed_a", url), dedupe_hash("feed_a", url));
    }
}
