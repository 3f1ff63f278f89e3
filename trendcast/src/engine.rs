//! The trend ingestion engine: one synchronous unit of work per invocation.
//!
//! For each source: fetch (or replay) and parse, normalize, resolve
//! publication dates. All surviving candidates then flow through clustering,
//! scoring, ranking and cap selection before the representatives are
//! persisted and the audit row is finalized. A fetch or parse failure for
//! one source never aborts the run; only an error escaping the per-source
//! loop marks the run failed.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{error, info, warn};

use common::EngineSettings;

use crate::cluster;
use crate::ingestion;
use crate::models::{
    CandidateItem, PublishedAtSource, RunParams, RunReport, RunStats, ScoredTrend, SourceError,
    TrendSource,
};
use crate::normalize;
use crate::published_at::{self, FetchCache};
use crate::scoring;
use crate::selection;
use crate::storage::{self, InsertOutcome};

const USER_AGENT: &str = "Trendcast/0.1.0";

/// Run one ingestion pass. Always records the audit row; returns `Err` only
/// when even opening the run row failed (the HTTP layer maps that, and any
/// `ok: false` report, to a 500 with a structured body).
pub async fn run_trend_ingestion(
    pool: &SqlitePool,
    settings: &EngineSettings,
    params: RunParams,
) -> Result<RunReport> {
    let limit_per_source = settings.clamp_limit_per_source(params.limit_per_source);

    let start_payload = serde_json::json!({
        "limitPerSource": limit_per_source,
        "mockFeedCount": params.mock_feeds.len(),
    });
    let run_id = storage::start_run(pool, &start_payload).await?;
    info!(
        "trend run {} started (limit_per_source={}, mock_feeds={})",
        run_id,
        limit_per_source,
        params.mock_feeds.len()
    );

    let mut stats = RunStats::default();
    match ingest(pool, settings, &params, limit_per_source, &mut stats).await {
        Ok(()) => {
            let payload = run_payload(limit_per_source, &params, &stats);
            storage::finish_run(
                pool,
                run_id,
                "success",
                &payload,
                stats.fetched as i64,
                stats.inserted as i64,
                None,
            )
            .await?;
            info!(
                "trend run {} succeeded: fetched={} inserted={} deduped={} clusters={}",
                run_id,
                stats.fetched,
                stats.inserted,
                stats.deduped(),
                stats.cluster_count
            );
            Ok(RunReport {
                run_id,
                ok: true,
                error: None,
                stats,
            })
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!("trend run {} failed: {}", run_id, message);
            let payload = run_payload(limit_per_source, &params, &stats);
            if let Err(update_err) = storage::finish_run(
                pool,
                run_id,
                "failed",
                &payload,
                stats.fetched as i64,
                stats.inserted as i64,
                Some(&message),
            )
            .await
            {
                error!(
                    "trend run {}: failed to record failure: {:#}",
                    run_id, update_err
                );
            }
            Ok(RunReport {
                run_id,
                ok: false,
                error: Some(message),
                stats,
            })
        }
    }
}

async fn ingest(
    pool: &SqlitePool,
    settings: &EngineSettings,
    params: &RunParams,
    limit_per_source: u32,
    stats: &mut RunStats,
) -> Result<()> {
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.fetch_timeout_seconds))
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build reqwest client")?;

    // Replay mode swaps the source set for the supplied mocks; the rows are
    // upserted so persisted items always reference a real source.
    let mut mock_bodies: HashMap<i64, String> = HashMap::new();
    let sources: Vec<TrendSource> = if params.mock_feeds.is_empty() {
        storage::load_enabled_sources(pool).await?
    } else {
        let mut list = Vec::new();
        for mock in &params.mock_feeds {
            let source = storage::upsert_mock_source(pool, mock).await?;
            mock_bodies.insert(source.id, mock.xml.clone());
            list.push(source);
        }
        list
    };
    stats.source_count = sources.len();

    let now = Utc::now();
    let mut cache = FetchCache::new();
    let meta_timeout = Duration::from_secs(settings.meta_fetch_timeout_seconds);
    let mut candidates: Vec<CandidateItem> = Vec::new();

    for source in &sources {
        let body = match mock_bodies.get(&source.id) {
            Some(xml) => Ok(xml.clone()),
            None => ingestion::fetch_feed_body(&client, &source.url).await,
        };
        let body = match body {
            Ok(b) => b,
            Err(e) => {
                let message = format!("{:#}", e);
                warn!("source {} failed: {}", source.key, message);
                stats.source_errors.push(SourceError {
                    source_key: source.key.clone(),
                    message,
                });
                continue;
            }
        };

        let mut entries = ingestion::parse_feed(&body);
        entries.truncate(limit_per_source as usize);
        info!("source {}: {} entries accepted", source.key, entries.len());

        for entry in entries {
            stats.fetched += 1;

            let Some(canonical_url) = normalize::canonicalize_url(&entry.url) else {
                // Without a canonical URL the candidate cannot be
                // deduplicated; drop it here, counted apart from ordinary
                // duplicates.
                stats.invalid_url += 1;
                continue;
            };

            let resolved = published_at::resolve_published_at(
                &client,
                &mut cache,
                &canonical_url,
                entry.published_raw.as_deref(),
                now,
                meta_timeout,
                settings.meta_fetch_max_bytes,
            )
            .await;
            if resolved.source != PublishedAtSource::Rss {
                stats.published_at_filled += 1;
            }

            candidates.push(CandidateItem {
                source_id: source.id,
                source_key: source.key.clone(),
                source_weight: source.weight,
                source_category: source.category.clone(),
                clickbait: normalize::matches_keyword(&entry.title, &settings.clickbait_keywords),
                url_hash: normalize::sha256_hex(&canonical_url),
                normalized_hash: normalize::normalized_title_hash(&entry.title),
                title_tokens: normalize::title_token_set(&entry.title),
                canonical_url,
                title: entry.title,
                url: entry.url,
                summary: entry.summary,
                published_at: resolved.published_at,
                published_at_source: resolved.source,
                published_at_fallback: resolved.fallback,
            });
        }
    }

    let candidate_count = candidates.len();
    let clusters = cluster::cluster_candidates(candidates);
    stats.cluster_count = clusters.len();
    stats.merged = candidate_count - clusters.len();

    // Diversity denominator: distinct categories among this run's cluster
    // representatives.
    let distinct_categories: HashSet<String> = clusters
        .iter()
        .map(|c| c.representative().source_category.trim().to_lowercase())
        .collect();
    let distinct = distinct_categories.len().max(1);

    let scored: Vec<ScoredTrend> = clusters
        .iter()
        .map(|c| ScoredTrend {
            cluster_key: c.key(),
            cluster_size: c.size(),
            score: scoring::score_representative(c.representative(), c.size(), distinct, now, settings),
            item: c.representative().clone(),
        })
        .collect();

    let ranked = selection::rank_trends(scored);
    let outcome = selection::select_top(
        ranked,
        settings.max_items_total,
        settings.max_items_per_source,
    );
    stats.dropped_total_cap = outcome.dropped_total_cap;
    stats.dropped_source_cap = outcome.dropped_source_cap;

    for trend in &outcome.selected {
        match storage::insert_trend_item(pool, trend).await? {
            InsertOutcome::Inserted => stats.inserted += 1,
            InsertOutcome::Duplicate => stats.conflicts += 1,
        }
    }

    Ok(())
}

fn run_payload(limit_per_source: u32, params: &RunParams, stats: &RunStats) -> serde_json::Value {
    serde_json::json!({
        "limitPerSource": limit_per_source,
        "mockFeedCount": params.mock_feeds.len(),
        "counts": {
            "fetched": stats.fetched,
            "inserted": stats.inserted,
            "deduped": stats.deduped(),
            "merged": stats.merged,
            "invalidUrl": stats.invalid_url,
            "conflicts": stats.conflicts,
            "publishedAtFilled": stats.published_at_filled,
            "clusters": stats.cluster_count,
            "droppedTotalCap": stats.dropped_total_cap,
            "droppedSourceCap": stats.dropped_source_cap,
            "sources": stats.source_count,
        },
        "sourceErrors": stats.source_errors,
    })
}
