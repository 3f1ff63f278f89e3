//! Cross-source dedup clustering.
//!
//! Single-pass, order-sensitive greedy clustering. Candidates are sorted by
//! (source weight desc, publication timestamp desc) so higher-trust, fresher
//! items become representatives and are compared against first; clusters are
//! then tested in creation order with cheap URL/hash membership checks before
//! the token-set comparison. O(clusters x candidates) is fine at realistic
//! per-run volumes (tens to low hundreds of candidates).
//!
//! The sort order and the representative tie-break chain (weight, recency,
//! title length) are deliberate policy: changing either changes which story
//! speaks for a cluster.

use std::collections::HashSet;

use crate::models::CandidateItem;
use crate::normalize::sha256_hex;

/// Minimum Jaccard similarity between a candidate's title tokens and the
/// cluster representative's for a merge without a URL/hash match.
pub const SIMILARITY_THRESHOLD: f64 = 0.66;

/// A set of candidates believed to report the same story.
#[derive(Debug)]
pub struct TrendCluster {
    members: Vec<CandidateItem>,
    rep_idx: usize,
    rep_tokens: HashSet<String>,
    urls: HashSet<String>,
    hashes: HashSet<String>,
}

impl TrendCluster {
    fn new(candidate: CandidateItem) -> Self {
        let rep_tokens = candidate.title_tokens.clone();
        let mut urls = HashSet::new();
        urls.insert(candidate.canonical_url.clone());
        let mut hashes = HashSet::new();
        hashes.insert(candidate.normalized_hash.clone());
        TrendCluster {
            members: vec![candidate],
            rep_idx: 0,
            rep_tokens,
            urls,
            hashes,
        }
    }

    fn matches(&self, candidate: &CandidateItem) -> bool {
        if self.urls.contains(&candidate.canonical_url) {
            return true;
        }
        if self.hashes.contains(&candidate.normalized_hash) {
            return true;
        }
        jaccard(&candidate.title_tokens, &self.rep_tokens) >= SIMILARITY_THRESHOLD
    }

    fn merge(&mut self, candidate: CandidateItem) {
        self.urls.insert(candidate.canonical_url.clone());
        self.hashes.insert(candidate.normalized_hash.clone());
        let challenger_wins = beats(&candidate, self.representative());
        self.members.push(candidate);
        if challenger_wins {
            self.rep_idx = self.members.len() - 1;
            self.rep_tokens = self.members[self.rep_idx].title_tokens.clone();
        }
    }

    /// The member elected to speak for this cluster. Always one of the
    /// members, never synthesized.
    pub fn representative(&self) -> &CandidateItem {
        &self.members[self.rep_idx]
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Stable derived cluster identifier: a truncated hash of the
    /// representative's normalized title hash. Reproducible across runs for
    /// the same winning story.
    pub fn key(&self) -> String {
        sha256_hex(&self.representative().normalized_hash)[..16].to_string()
    }
}

/// Representative election: higher source weight wins; on a tie the later
/// publication timestamp; on a further tie the longer title.
fn beats(challenger: &CandidateItem, incumbent: &CandidateItem) -> bool {
    if challenger.source_weight != incumbent.source_weight {
        return challenger.source_weight > incumbent.source_weight;
    }
    if challenger.published_at != incumbent.published_at {
        return challenger.published_at > incumbent.published_at;
    }
    challenger.title.chars().count() > incumbent.title.chars().count()
}

/// Jaccard similarity over two token sets. Two empty sets are defined as 0
/// so tokenless titles never merge on similarity alone.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Group candidates into clusters. Consumes the candidate list; the input
/// order is first replaced by the deterministic (weight, recency) sort.
pub fn cluster_candidates(mut candidates: Vec<CandidateItem>) -> Vec<TrendCluster> {
    candidates.sort_by(|a, b| {
        b.source_weight
            .partial_cmp(&a.source_weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.published_at.cmp(&a.published_at))
    });

    let mut clusters: Vec<TrendCluster> = Vec::new();
    for candidate in candidates {
        match clusters.iter_mut().find(|c| c.matches(&candidate)) {
            Some(cluster) => cluster.merge(candidate),
            None => clusters.push(TrendCluster::new(candidate)),
        }
    }

    tracing::debug!("clustering produced {} clusters", clusters.len());
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublishedAtSource;
    use crate::normalize::{canonicalize_url, normalized_title_hash, title_token_set};
    use chrono::{Duration, TimeZone, Utc};

    fn cand(source_key: &str, weight: f64, title: &str, url: &str, hours_ago: i64) -> CandidateItem {
        let canonical = canonicalize_url(url).expect("test url parses");
        CandidateItem {
            source_id: 1,
            source_key: source_key.to_string(),
            source_weight: weight,
            source_category: "general".to_string(),
            title: title.to_string(),
            url: url.to_string(),
            summary: None,
            published_at: Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap()
                - Duration::hours(hours_ago),
            published_at_source: PublishedAtSource::Rss,
            published_at_fallback: None,
            canonical_url: canonical.clone(),
            url_hash: crate::normalize::sha256_hex(&canonical),
            normalized_hash: normalized_title_hash(title),
            title_tokens: title_token_set(title),
            clickbait: false,
        }
    }

    #[test]
    fn jaccard_identities() {
        let a: HashSet<String> = ["alpha", "beta"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["gamma", "delta"].iter().map(|s| s.to_string()).collect();
        let empty: HashSet<String> = HashSet::new();

        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &b), 0.0);
        assert_eq!(jaccard(&empty, &empty), 0.0);
    }

    #[test]
    fn titles_differing_by_trailing_punctuation_clear_the_threshold() {
        let a = title_token_set("Company X launches product");
        let b = title_token_set("Company X launches product!?  ");
        assert!(jaccard(&a, &b) >= SIMILARITY_THRESHOLD);
    }

    #[test]
    fn identical_canonical_urls_cluster_regardless_of_order() {
        let a = cand("feed_a", 1.0, "First headline wording", "https://example.com/s?utm_source=a", 1);
        let b = cand(
            "feed_b",
            2.0,
            "Completely different angle on it",
            "https://example.com/s",
            2,
        );

        for pair in [vec![a.clone(), b.clone()], vec![b, a]] {
            let clusters = cluster_candidates(pair);
            assert_eq!(clusters.len(), 1);
            assert_eq!(clusters[0].size(), 2);
        }
    }

    #[test]
    fn matching_title_hash_clusters_different_urls() {
        let a = cand("feed_a", 1.0, "Company X launches product", "https://a.example.com/1", 1);
        let b = cand("feed_b", 1.0, "Company X launches product!", "https://b.example.com/2", 2);

        let clusters = cluster_candidates(vec![a, b]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].size(), 2);
    }

    #[test]
    fn similar_token_sets_cluster_without_exact_match() {
        // 4 shared tokens of 5 total = 0.8
        let a = cand("feed_a", 1.0, "Company X launches product", "https://a.example.com/1", 1);
        let b = cand(
            "feed_b",
            1.0,
            "Company X launches new product",
            "https://b.example.com/2",
            2,
        );

        let clusters = cluster_candidates(vec![a, b]);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn unrelated_stories_stay_separate() {
        let a = cand("feed_a", 1.0, "Company X launches product", "https://a.example.com/1", 1);
        let b = cand("feed_b", 1.0, "Volcano erupts on remote island", "https://b.example.com/2", 2);

        let clusters = cluster_candidates(vec![a, b]);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.size() == 1));
    }

    #[test]
    fn representative_election_follows_tie_break_chain() {
        // Higher weight wins outright.
        let low = cand("feed_low", 1.0, "Company X launches product", "https://a.example.com/1", 0);
        let high = cand("feed_high", 3.0, "Company X launches product", "https://b.example.com/2", 5);
        let clusters = cluster_candidates(vec![low.clone(), high.clone()]);
        assert_eq!(clusters[0].representative().source_key, "feed_high");

        // Equal weight: later timestamp wins.
        let older = cand("feed_a", 1.0, "Company X launches product", "https://a.example.com/1", 5);
        let newer = cand("feed_b", 1.0, "Company X launches product", "https://b.example.com/2", 1);
        let clusters = cluster_candidates(vec![older, newer]);
        assert_eq!(clusters[0].representative().source_key, "feed_b");

        // Equal weight and timestamp: longer title wins.
        let short = cand("feed_a", 1.0, "Company X launches product", "https://a.example.com/1", 2);
        let long = cand(
            "feed_b",
            1.0,
            "Company X launches product line",
            "https://b.example.com/2",
            2,
        );
        let clusters = cluster_candidates(vec![short, long]);
        assert_eq!(clusters[0].representative().source_key, "feed_b");
    }

    #[test]
    fn cluster_key_is_stable_and_derived() {
        let a = cand("feed_a", 1.0, "Company X launches product", "https://a.example.com/1", 1);
        let clusters_first = cluster_candidates(vec![a.clone()]);
        let clusters_second = cluster_candidates(vec![a]);
        assert_eq!(clusters_first[0].key(), clusters_second[0].key());
        assert_eq!(clusters_first[0].key().len(), 16);
    }
}
