/*
trendcast - single-binary main.rs
This binary starts the Rocket HTTP server, or runs one ingestion pass with
--run-once and exits.
*/

use anyhow::Result;
use clap::Parser;
use common::{init_db_pool, Config, EngineSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use trendcast::engine;
use trendcast::models::RunParams;
use trendcast::server;

#[derive(Parser, Debug)]
#[command(name = "trendcast", about = "Trendcast single-binary trend ingestion server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run a single ingestion pass and exit (do not bind HTTP server)
    #[arg(long)]
    run_once: bool,

    /// Per-source item limit for --run-once
    #[arg(long)]
    limit_per_source: Option<u32>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    // Load configuration with defaults
    let config = match Config::load_with_defaults(
        if default_path.exists() {
            Some(&default_path)
        } else {
            None
        },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override_file = ?override_path, "configuration loaded");

    // Resolve engine settings once; raw strings are parsed and clamped here.
    let settings = match EngineSettings::resolve(&config.engine) {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "invalid engine configuration");
            return Err(e);
        }
    };

    // Initialize DB pool - resolve and log the absolute DB path before connecting
    let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");

    let db_pool = match init_db_pool(&db_path_abs).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %db_path_abs, "failed to initialize database pool");
            return Err(e);
        }
    };
    let db_pool = Arc::new(db_pool);

    // Ensure core schema and sync configured sources before anything runs.
    server::ensure_schema(&db_pool).await?;
    common::sync_sources(&config, &db_pool).await?;
    info!("Configuration sources synchronized into database");

    if args.run_once {
        info!("Starting in run-once mode");
        let report = engine::run_trend_ingestion(
            &db_pool,
            &settings,
            RunParams {
                limit_per_source: args.limit_per_source,
                mock_feeds: Vec::new(),
            },
        )
        .await?;

        let summary = serde_json::json!({
            "runId": report.run_id,
            "ok": report.ok,
            "error": report.error,
            "stats": report.stats,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);

        if !report.ok {
            anyhow::bail!(
                "trend run {} failed: {}",
                report.run_id,
                report.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        return Ok(());
    }

    // Launch the Rocket server (blocking until Rocket shuts down)
    info!("Launching Rocket HTTP server");
    server::launch_rocket(
        db_pool.clone(),
        Some(Arc::new(config.clone())),
        Arc::new(settings),
    )
    .await?;

    info!("Shutdown complete");
    Ok(())
}
