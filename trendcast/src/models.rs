use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Provenance of a candidate's resolved publication timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishedAtSource {
    /// The feed entry itself carried a parseable date.
    Rss,
    /// Extracted from the article page's meta tags / JSON-LD.
    Meta,
    /// Neither worked; stamped with the processing time.
    Fetched,
}

impl PublishedAtSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishedAtSource::Rss => "rss",
            PublishedAtSource::Meta => "meta",
            PublishedAtSource::Fetched => "fetched",
        }
    }
}

/// A source row as the engine sees it.
#[derive(Debug, Clone)]
pub struct TrendSource {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub url: String,
    pub weight: f64,
    pub category: String,
    pub theme: Option<String>,
}

/// A feed entry as extracted by the lenient parser, before normalization.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub published_raw: Option<String>,
}

/// One parsed feed entry after normalization and date resolution. Transient:
/// only the elected cluster representative reaches the database.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub source_id: i64,
    pub source_key: String,
    pub source_weight: f64,
    pub source_category: String,
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub published_at: DateTime<Utc>,
    pub published_at_source: PublishedAtSource,
    pub published_at_fallback: Option<DateTime<Utc>>,
    pub canonical_url: String,
    pub url_hash: String,
    pub normalized_hash: String,
    /// Title token set used for similarity only; never persisted.
    pub title_tokens: HashSet<String>,
    pub clickbait: bool,
}

/// Additive score with its persisted breakdown. Every term is rounded to six
/// decimals and `total == freshness + source + bonus - penalty` holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub total: f64,
    pub freshness: f64,
    pub source: f64,
    pub bonus: f64,
    pub penalty: f64,
}

/// A cluster representative ready for ranking and persistence.
#[derive(Debug, Clone)]
pub struct ScoredTrend {
    pub item: CandidateItem,
    pub cluster_key: String,
    pub cluster_size: usize,
    pub score: ScoreBreakdown,
}

/// Replay feed supplied on the run endpoint instead of a network fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockFeed {
    pub source_key: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub weight: Option<f64>,
    pub category: Option<String>,
    pub theme: Option<String>,
    pub xml: String,
}

/// Per-source fetch/parse failure recorded in the run audit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceError {
    pub source_key: String,
    pub message: String,
}

/// Caller-facing parameters of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    pub limit_per_source: Option<u32>,
    pub mock_feeds: Vec<MockFeed>,
}

/// Counters accumulated across one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub fetched: usize,
    pub inserted: usize,
    /// Candidates merged away into an existing cluster.
    pub merged: usize,
    /// Candidates dropped because their URL failed to parse.
    pub invalid_url: usize,
    /// Insert conflicts treated as already-ingested duplicates.
    pub conflicts: usize,
    pub published_at_filled: usize,
    pub source_count: usize,
    pub cluster_count: usize,
    pub dropped_total_cap: usize,
    pub dropped_source_cap: usize,
    pub source_errors: Vec<SourceError>,
}

impl RunStats {
    /// Everything removed between fetch and insert that was a duplicate of
    /// another story (or could not be deduplicated at all).
    pub fn deduped(&self) -> usize {
        self.merged + self.invalid_url + self.conflicts
    }
}

/// Final report of a run, consumed by the HTTP layer and `--run-once`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: i64,
    pub ok: bool,
    pub error: Option<String>,
    pub stats: RunStats,
}
