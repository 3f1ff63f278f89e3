/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Trendcast.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file with default/override merging
- Typed engine settings parsed and clamped from raw config strings
- Helpers to initialize an SQLite database pool and sync configured sources
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/trendcast.db")
    pub path: String,
}

/// HTTP server configuration section. Bind address and port are merged into
/// Rocket's figment by the server module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Raw engine tunables as they appear in config. The keyword lists, the
/// entertainment bonus and the category-weight overrides are carried as plain
/// strings (CSV / float / JSON) and parsed into [`EngineSettings`] at load
/// time, where clamping happens exactly once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub clickbait_keywords: Option<String>,
    pub sensitive_keywords: Option<String>,
    pub overheated_keywords: Option<String>,
    pub entertainment_bonus: Option<String>,
    pub category_weights: Option<String>,
    pub max_items_total: Option<u32>,
    pub max_items_per_source: Option<u32>,
    pub default_limit_per_source: Option<u32>,
    pub fetch_timeout_seconds: Option<u64>,
    pub meta_fetch_timeout_seconds: Option<u64>,
    pub meta_fetch_max_bytes: Option<usize>,
    pub duplicate_penalty: Option<f64>,
}

/// One configured feed source. Synced into the `trend_sources` table at
/// startup; the engine itself only reads source rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub key: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub category: Option<String>,
    pub theme: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Documented default category weights. Lighter / entertainment categories
/// are biased up, hard-news categories down. Overrides from config merge
/// over this map; unknown categories fall back to the `general` entry.
pub fn default_category_weights() -> HashMap<String, f64> {
    let defaults = [
        ("general", 1.0),
        ("entertainment", 1.3),
        ("lifestyle", 1.2),
        ("culture", 1.15),
        ("music", 1.2),
        ("gaming", 1.15),
        ("technology", 1.1),
        ("science", 1.05),
        ("sports", 1.1),
        ("business", 0.95),
        ("health", 0.95),
        ("world", 0.85),
        ("politics", 0.8),
        ("crime", 0.75),
        ("war", 0.7),
        ("disaster", 0.7),
    ];
    defaults.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

const DEFAULT_CLICKBAIT_KEYWORDS: &str = "you won't believe,shocking,jaw-dropping,mind-blowing,\
what happened next,goes viral,the real reason,this one trick";

const DEFAULT_SENSITIVE_KEYWORDS: &str =
    "killed,murder,suicide,massacre,terror attack,mass shooting,fatal crash";

const DEFAULT_OVERHEATED_KEYWORDS: &str = "outrage,fury,slams,destroys,erupts,meltdown,firestorm";

/// Typed, validated engine settings. Built once at startup from
/// [`EngineConfig`] plus `TRENDCAST_*` environment overrides; all clamping
/// happens here so the engine never re-parses raw strings per item.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub clickbait_keywords: Vec<String>,
    pub sensitive_keywords: Vec<String>,
    pub overheated_keywords: Vec<String>,
    pub entertainment_bonus: f64,
    pub category_weights: HashMap<String, f64>,
    pub max_items_total: usize,
    pub max_items_per_source: usize,
    pub default_limit_per_source: u32,
    pub fetch_timeout_seconds: u64,
    pub meta_fetch_timeout_seconds: u64,
    pub meta_fetch_max_bytes: usize,
    pub duplicate_penalty: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        // The all-defaults config contains no user strings to reject.
        EngineSettings::resolve(&EngineConfig::default()).expect("default engine config is valid")
    }
}

impl EngineSettings {
    /// Parse and clamp the raw engine config. Environment variables of the
    /// form `TRENDCAST_<FIELD>` take precedence over the config file for the
    /// string-valued tunables.
    pub fn resolve(raw: &EngineConfig) -> Result<Self> {
        let clickbait = string_setting(
            "TRENDCAST_CLICKBAIT_KEYWORDS",
            raw.clickbait_keywords.as_deref(),
            DEFAULT_CLICKBAIT_KEYWORDS,
        );
        let sensitive = string_setting(
            "TRENDCAST_SENSITIVE_KEYWORDS",
            raw.sensitive_keywords.as_deref(),
            DEFAULT_SENSITIVE_KEYWORDS,
        );
        let overheated = string_setting(
            "TRENDCAST_OVERHEATED_KEYWORDS",
            raw.overheated_keywords.as_deref(),
            DEFAULT_OVERHEATED_KEYWORDS,
        );

        let bonus_raw = string_setting(
            "TRENDCAST_ENTERTAINMENT_BONUS",
            raw.entertainment_bonus.as_deref(),
            "0.5",
        );
        let entertainment_bonus = bonus_raw
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid entertainment_bonus value: {:?}", bonus_raw))?
            .clamp(0.0, 3.0);

        let mut category_weights = default_category_weights();
        let weights_raw = std::env::var("TRENDCAST_CATEGORY_WEIGHTS")
            .ok()
            .or_else(|| raw.category_weights.clone());
        if let Some(json) = weights_raw {
            let overrides: HashMap<String, f64> = serde_json::from_str(&json)
                .with_context(|| format!("invalid category_weights JSON: {:?}", json))?;
            for (k, v) in overrides {
                category_weights.insert(k.trim().to_lowercase(), v.clamp(0.0, 5.0));
            }
        }

        Ok(EngineSettings {
            clickbait_keywords: parse_keyword_csv(&clickbait),
            sensitive_keywords: parse_keyword_csv(&sensitive),
            overheated_keywords: parse_keyword_csv(&overheated),
            entertainment_bonus,
            category_weights,
            max_items_total: raw.max_items_total.unwrap_or(12).clamp(1, 100) as usize,
            max_items_per_source: raw.max_items_per_source.unwrap_or(3).clamp(1, 20) as usize,
            default_limit_per_source: raw.default_limit_per_source.unwrap_or(20).clamp(1, 50),
            fetch_timeout_seconds: raw.fetch_timeout_seconds.unwrap_or(10).clamp(1, 120),
            meta_fetch_timeout_seconds: raw.meta_fetch_timeout_seconds.unwrap_or(3).clamp(1, 30),
            meta_fetch_max_bytes: raw
                .meta_fetch_max_bytes
                .unwrap_or(200_000)
                .clamp(1_024, 1_000_000),
            duplicate_penalty: raw.duplicate_penalty.unwrap_or(0.0).max(0.0),
        })
    }

    /// Clamp a caller-supplied per-source limit to the sane range, falling
    /// back to the configured default when absent.
    pub fn clamp_limit_per_source(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit_per_source)
            .clamp(1, 50)
    }

    /// Category weight lookup, falling back to the `general` entry (1.0 if
    /// even that was removed by an override).
    pub fn category_weight(&self, category: &str) -> f64 {
        let key = category.trim().to_lowercase();
        self.category_weights
            .get(&key)
            .or_else(|| self.category_weights.get("general"))
            .copied()
            .unwrap_or(1.0)
    }
}

fn string_setting(env_key: &str, config_value: Option<&str>, default: &str) -> String {
    std::env::var(env_key)
        .ok()
        .or_else(|| config_value.map(|s| s.to_string()))
        .unwrap_or_else(|| default.to_string())
}

fn parse_keyword_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory and DB file if necessary and returns a
/// configured `SqlitePool`. Defaults are conservative:
/// - max_connections: 5
/// - WAL journal mode
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    // Try to create the DB file if it does not already exist. This gives a
    // clearer error earlier (filesystem permission or path issues) instead of
    // only surfacing it via the SQLite connection attempt.
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// Ensure that sources defined in the in-memory configuration are present in
/// the `trend_sources` table. This function will:
///  - INSERT OR IGNORE a row for each configured source (safe to call multiple times)
///  - UPDATE the mutable fields so config edits take effect on restart
/// Call this once after the schema exists so the engine sees the configured feeds.
pub async fn sync_sources(config: &Config, pool: &SqlitePool) -> Result<()> {
    for s in &config.sources {
        sqlx::query(
            "INSERT OR IGNORE INTO trend_sources (source_key, name, url, enabled, weight, category, theme) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&s.key)
        .bind(&s.name)
        .bind(&s.url)
        .bind(s.enabled)
        .bind(s.weight)
        .bind(s.category.as_deref().unwrap_or("general"))
        .bind(s.theme.as_deref())
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert or ignore source {}", s.key))?;

        sqlx::query(
            "UPDATE trend_sources SET name = ?, url = ?, enabled = ?, weight = ?, category = ?, theme = ? \
             WHERE source_key = ?",
        )
        .bind(&s.name)
        .bind(&s.url)
        .bind(s.enabled)
        .bind(s.weight)
        .bind(s.category.as_deref().unwrap_or("general"))
        .bind(s.theme.as_deref())
        .bind(&s.key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to update source {}", s.key))?;
    }

    Ok(())
}
