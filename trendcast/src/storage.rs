use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::models::{MockFeed, ScoredTrend, TrendSource};
use crate::normalize::dedupe_hash;

/// Load the enabled sources the engine should fetch, in stable id order.
pub async fn load_enabled_sources(pool: &SqlitePool) -> Result<Vec<TrendSource>> {
    let rows = sqlx::query(
        "SELECT id, source_key, name, url, weight, category, theme \
         FROM trend_sources WHERE enabled = 1 ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .context("failed to load enabled sources")?;

    Ok(rows.into_iter().map(|r| row_to_source(&r)).collect())
}

fn row_to_source(r: &sqlx::sqlite::SqliteRow) -> TrendSource {
    TrendSource {
        id: r.get("id"),
        key: r.get("source_key"),
        name: r.get("name"),
        url: r.get("url"),
        weight: r.get("weight"),
        category: r.get("category"),
        theme: r.get("theme"),
    }
}

/// Upsert a replayed source so mock runs persist against real source rows,
/// then return the stored row.
pub async fn upsert_mock_source(pool: &SqlitePool, mock: &MockFeed) -> Result<TrendSource> {
    let name = mock.name.clone().unwrap_or_else(|| mock.source_key.clone());
    let url = mock
        .url
        .clone()
        .unwrap_or_else(|| format!("mock://{}", mock.source_key));
    let weight = mock.weight.unwrap_or(1.0);
    let category = mock.category.clone().unwrap_or_else(|| "general".to_string());

    sqlx::query(
        "INSERT OR IGNORE INTO trend_sources (source_key, name, url, enabled, weight, category, theme) \
         VALUES (?, ?, ?, 1, ?, ?, ?)",
    )
    .bind(&mock.source_key)
    .bind(&name)
    .bind(&url)
    .bind(weight)
    .bind(&category)
    .bind(mock.theme.as_deref())
    .execute(pool)
    .await
    .context("failed to insert mock source")?;

    sqlx::query(
        "UPDATE trend_sources SET name = ?, url = ?, weight = ?, category = ?, theme = ? \
         WHERE source_key = ?",
    )
    .bind(&name)
    .bind(&url)
    .bind(weight)
    .bind(&category)
    .bind(mock.theme.as_deref())
    .bind(&mock.source_key)
    .execute(pool)
    .await
    .context("failed to update mock source")?;

    let row = sqlx::query(
        "SELECT id, source_key, name, url, weight, category, theme \
         FROM trend_sources WHERE source_key = ?",
    )
    .bind(&mock.source_key)
    .fetch_one(pool)
    .await
    .context("failed to load mock source after upsert")?;

    Ok(row_to_source(&row))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Unique-constraint hit on the (source, canonical URL) hash: the same
    /// story from the same source already exists. Not an error.
    Duplicate,
}

/// Insert one cluster representative. Re-ingesting the same story from the
/// same source is idempotent via the `dedupe_hash` unique constraint.
pub async fn insert_trend_item(pool: &SqlitePool, trend: &ScoredTrend) -> Result<InsertOutcome> {
    let item = &trend.item;
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO trend_items
            (source_id, title, url, summary, published_at, published_at_source,
             published_at_fallback, canonical_url, url_hash, normalized_hash,
             dedupe_hash, cluster_key, cluster_size, is_cluster_representative,
             score, score_freshness, score_source, score_bonus, score_penalty,
             created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.source_id)
    .bind(&item.title)
    .bind(&item.url)
    .bind(item.summary.as_deref())
    .bind(item.published_at)
    .bind(item.published_at_source.as_str())
    .bind(item.published_at_fallback)
    .bind(&item.canonical_url)
    .bind(&item.url_hash)
    .bind(&item.normalized_hash)
    .bind(dedupe_hash(&item.source_key, &item.canonical_url))
    .bind(&trend.cluster_key)
    .bind(trend.cluster_size as i64)
    .bind(trend.score.total)
    .bind(trend.score.freshness)
    .bind(trend.score.source)
    .bind(trend.score.bonus)
    .bind(trend.score.penalty)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to insert trend item")?;

    if result.rows_affected() == 0 {
        debug!("trend item already present: {}", item.canonical_url);
        Ok(InsertOutcome::Duplicate)
    } else {
        Ok(InsertOutcome::Inserted)
    }
}

/// Open the audit row for a run. The payload snapshot carries the initiating
/// parameters; counters start at zero.
pub async fn start_run(pool: &SqlitePool, payload: &serde_json::Value) -> Result<i64> {
    let run_id: i64 = sqlx::query_scalar(
        "INSERT INTO trend_runs (status, payload, fetched_count, inserted_count, created_at) \
         VALUES ('running', ?, 0, 0, ?) RETURNING id",
    )
    .bind(payload.to_string())
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("failed to insert run row")?;
    Ok(run_id)
}

/// Close the audit row. Called exactly once per run, with either `success`
/// or `failed`; the payload is the final snapshot including per-source
/// errors and whatever counts had accumulated.
pub async fn finish_run(
    pool: &SqlitePool,
    run_id: i64,
    status: &str,
    payload: &serde_json::Value,
    fetched_count: i64,
    inserted_count: i64,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE trend_runs SET status = ?, payload = ?, fetched_count = ?, inserted_count = ?, \
         error = ?, ended_at = ? WHERE id = ?",
    )
    .bind(status)
    .bind(payload.to_string())
    .bind(fetched_count)
    .bind(inserted_count)
    .bind(error)
    .bind(Utc::now())
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to finalize run row")?;
    Ok(())
}

/// A persisted trend item as returned by the read API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendItemRow {
    pub id: i64,
    pub source_key: String,
    pub title: String,
    pub url: String,
    pub canonical_url: String,
    pub published_at: DateTime<Utc>,
    pub published_at_source: String,
    pub cluster_key: String,
    pub cluster_size: i64,
    pub score: f64,
    pub score_freshness: f64,
    pub score_source: f64,
    pub score_bonus: f64,
    pub score_penalty: f64,
}

/// Most recently persisted trend items, best score first within a run.
pub async fn recent_trend_items(pool: &SqlitePool, limit: i64) -> Result<Vec<TrendItemRow>> {
    let rows = sqlx::query(
        r#"
        SELECT t.id, s.source_key, t.title, t.url, t.canonical_url, t.published_at,
               t.published_at_source, t.cluster_key, t.cluster_size,
               t.score, t.score_freshness, t.score_source, t.score_bonus, t.score_penalty
        FROM trend_items t
        JOIN trend_sources s ON t.source_id = s.id
        ORDER BY t.id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to query recent trend items")?;

    Ok(rows
        .into_iter()
        .map(|r| TrendItemRow {
            id: r.get("id"),
            source_key: r.get("source_key"),
            title: r.get("title"),
            url: r.get("url"),
            canonical_url: r.get("canonical_url"),
            published_at: r.get("published_at"),
            published_at_source: r.get("published_at_source"),
            cluster_key: r.get("cluster_key"),
            cluster_size: r.get("cluster_size"),
            score: r.get("score"),
            score_freshness: r.get("score_freshness"),
            score_source: r.get("score_source"),
            score_bonus: r.get("score_bonus"),
            score_penalty: r.get("score_penalty"),
        })
        .collect())
}
