use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{get, post, routes, State};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use common::{Config, EngineSettings};

use crate::engine;
use crate::models::{MockFeed, RunParams, RunReport, SourceError};
use crate::storage;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Option<Arc<Config>>,
    pub settings: Arc<EngineSettings>,
    pub db: SqlitePool,
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    source_count: usize,
    max_items_total: usize,
    max_items_per_source: usize,
}

/// Request body for triggering a trend ingestion run. `mockFeeds` replays
/// fixed feed content instead of performing network fetches, which is the
/// seam that makes the engine deterministically testable.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    limit_per_source: Option<u32>,
    #[serde(default)]
    mock_feeds: Vec<MockFeed>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    ok: bool,
    run_id: Option<i64>,
    fetched_count: usize,
    inserted_count: usize,
    deduped_count: usize,
    published_at_filled_count: usize,
    source_count: usize,
    source_errors: Vec<SourceError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RunResponse {
    fn from_report(report: &RunReport) -> Self {
        RunResponse {
            ok: report.ok,
            run_id: Some(report.run_id),
            fetched_count: report.stats.fetched,
            inserted_count: report.stats.inserted,
            deduped_count: report.stats.deduped(),
            published_at_filled_count: report.stats.published_at_filled,
            source_count: report.stats.source_count,
            source_errors: report.stats.source_errors.clone(),
            error: report.error.clone(),
        }
    }

    fn failure(message: &str) -> Self {
        RunResponse {
            ok: false,
            run_id: None,
            fetched_count: 0,
            inserted_count: 0,
            deduped_count: 0,
            published_at_filled_count: 0,
            source_count: 0,
            source_errors: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning simple JSON with uptime and basic config info.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let now = Utc::now();
    let uptime = (now - state.started_at).num_seconds();

    let source_count = state
        .config
        .as_ref()
        .map(|c| c.sources.len())
        .unwrap_or_default();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        source_count,
        max_items_total: state.settings.max_items_total,
        max_items_per_source: state.settings.max_items_per_source,
    })
}

/// Trigger one trend ingestion run. The run is driven synchronously to
/// completion; the caller always receives a structured JSON response, with
/// HTTP 500 (never a raw stack trace) when the run failed.
#[post("/api/v1/trends/run", data = "<body>")]
async fn run_trends(state: &State<AppState>, body: Json<RunRequest>) -> Custom<Json<RunResponse>> {
    let body = body.into_inner();
    let params = RunParams {
        limit_per_source: body.limit_per_source,
        mock_feeds: body.mock_feeds,
    };

    match engine::run_trend_ingestion(&state.db, &state.settings, params).await {
        Ok(report) => {
            let status = if report.ok {
                Status::Ok
            } else {
                Status::InternalServerError
            };
            Custom(status, Json(RunResponse::from_report(&report)))
        }
        Err(e) => {
            tracing::error!("trend run could not start: {:#}", e);
            Custom(
                Status::InternalServerError,
                Json(RunResponse::failure(&format!("{:#}", e))),
            )
        }
    }
}

/// List the most recently persisted trend items with score breakdowns.
#[get("/api/v1/trends?<limit>")]
async fn list_trends(
    state: &State<AppState>,
    limit: Option<i64>,
) -> Result<Json<Vec<storage::TrendItemRow>>, Status> {
    let limit = limit.unwrap_or(20).clamp(1, 100);
    storage::recent_trend_items(&state.db, limit)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("failed to list trend items: {:#}", e);
            Status::InternalServerError
        })
}

// ============================================================================
// Database Schema Management
// ============================================================================

/// Ensure the required schema exists. This runs CREATE TABLE IF NOT EXISTS
/// statements for core tables; idempotent and safe to call at startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    tracing::info!("server: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS trend_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            weight REAL NOT NULL DEFAULT 1.0,
            category TEXT NOT NULL DEFAULT 'general',
            theme TEXT
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS trend_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            summary TEXT,
            published_at TIMESTAMP NOT NULL,
            published_at_source TEXT NOT NULL,
            published_at_fallback TIMESTAMP,
            canonical_url TEXT NOT NULL,
            url_hash TEXT NOT NULL,
            normalized_hash TEXT NOT NULL,
            dedupe_hash TEXT NOT NULL UNIQUE,
            cluster_key TEXT NOT NULL,
            cluster_size INTEGER NOT NULL DEFAULT 1,
            is_cluster_representative BOOLEAN NOT NULL DEFAULT TRUE,
            score REAL NOT NULL,
            score_freshness REAL NOT NULL,
            score_source REAL NOT NULL,
            score_bonus REAL NOT NULL,
            score_penalty REAL NOT NULL,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY(source_id) REFERENCES trend_sources(id) ON DELETE CASCADE
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS trend_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL,
            payload TEXT,
            fetched_count INTEGER NOT NULL DEFAULT 0,
            inserted_count INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            ended_at TIMESTAMP
        );
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_trend_items_cluster_key ON trend_items(cluster_key);
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_trend_items_source_id ON trend_items(source_id);
        "#,
    ];

    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| "failed to ensure schema")?;
    }

    tracing::info!("server: DB schema ensured");
    Ok(())
}

/// Build and launch a Rocket server.
///
/// The DB pool, optional application config and resolved engine settings are
/// provided by the caller; the server does not re-init or migrate the
/// database here. Blocks until Rocket shuts down.
pub async fn launch_rocket(
    db_pool: Arc<SqlitePool>,
    config: Option<Arc<Config>>,
    settings: Arc<EngineSettings>,
) -> Result<()> {
    let state = AppState {
        started_at: Utc::now(),
        config: config.clone(),
        settings,
        db: db_pool.as_ref().clone(), // SqlitePool is already ref-counted
    };

    // Apply [server] bind/port from the loaded config, if present.
    let mut fig = rocket::Config::figment();
    if let Some(server_cfg) = config.as_ref().and_then(|c| c.server.clone()) {
        if let Some(bind) = server_cfg.bind {
            fig = fig.merge(("address", bind));
        }
        if let Some(port) = server_cfg.port {
            fig = fig.merge(("port", port));
        }
    }

    let rocket = rocket::custom(fig).manage(state).mount(
        "/",
        routes![health, status, run_trends, list_trends],
    );

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
