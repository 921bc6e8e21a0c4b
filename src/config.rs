// src/config.rs

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::models::{Category, RecordId};

// Acceptance threshold for the single-threshold (local catalog) matcher
pub const DEFAULT_MIN_SCORE: f64 = 70.0;

// Descending ladder for the geographic matcher
pub const DEFAULT_THRESHOLDS: [f64; 4] = [90.0, 85.0, 80.0, 75.0];

// Safety limit on candidates scored per query
pub const DEFAULT_MAX_CANDIDATES: usize = 3000;

// Terms indexed per reference record
pub const DEFAULT_TOKEN_LIMIT_PER_RECORD: usize = 3;

// Ignore tokens shorter than this length
pub const DEFAULT_MIN_TOKEN_LENGTH: usize = 3;

pub const DEFAULT_RETRY_BACKOFF_BASE_SECS: f64 = 2.0;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_CONCURRENCY: usize = 4;

// Dish alias matching is stricter than nutrition lookup
pub const DEFAULT_TEMPLATE_MATCH_THRESHOLD: f64 = 85.0;

pub const FDC_SEARCH_URL: &str = "https://api.nal.usda.gov/fdc/v1/foods/search";

// Env files tried in order before reading LINKAGE_* variables
pub const ENV_PATHS: [&str; 3] = [".env", ".env.local", "../.env"];

/// Engine options. Every field has a default so a bare `MatchConfig::default()` is usable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub min_score: f64,
    pub thresholds: Vec<f64>,
    pub max_candidates: usize,
    pub token_limit_per_record: usize,
    pub min_token_length: usize,
    pub include_secondary_signal: bool,
    pub retries: u32,
    pub retry_backoff_base_seconds: f64,
    pub request_budget: Option<usize>,
    pub override_map: HashMap<String, RecordId>,
    pub fetch_timeout_secs: u64,
    pub page_size: usize,
    pub concurrency: usize,
    pub inter_request_sleep_secs: f64,
    pub fallback_categories: Vec<Category>,
    pub template_match_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
            token_limit_per_record: DEFAULT_TOKEN_LIMIT_PER_RECORD,
            min_token_length: DEFAULT_MIN_TOKEN_LENGTH,
            include_secondary_signal: false,
            retries: 0,
            retry_backoff_base_seconds: DEFAULT_RETRY_BACKOFF_BASE_SECS,
            request_budget: None,
            override_map: HashMap::new(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            inter_request_sleep_secs: 0.0,
            fallback_categories: Category::FDC.to_vec(),
            template_match_threshold: DEFAULT_TEMPLATE_MATCH_THRESHOLD,
        }
    }
}

impl MatchConfig {
    /// Defaults overlaid with any `LINKAGE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MatchConfig::from_env`] but reads from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("LINKAGE_MIN_SCORE") {
            config.min_score = parse_var("LINKAGE_MIN_SCORE", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_THRESHOLDS") {
            config.thresholds = parse_thresholds(&v);
        }
        if let Some(v) = lookup("LINKAGE_MAX_CANDIDATES") {
            config.max_candidates = parse_var("LINKAGE_MAX_CANDIDATES", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_TOKEN_LIMIT") {
            config.token_limit_per_record = parse_var("LINKAGE_TOKEN_LIMIT", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_MIN_TOKEN_LENGTH") {
            config.min_token_length = parse_var("LINKAGE_MIN_TOKEN_LENGTH", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_INCLUDE_MERCHANT") {
            config.include_secondary_signal = parse_bool(&v);
        }
        if let Some(v) = lookup("LINKAGE_RETRIES") {
            config.retries = parse_var("LINKAGE_RETRIES", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_RETRY_SLEEP") {
            config.retry_backoff_base_seconds = parse_var("LINKAGE_RETRY_SLEEP", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_MAX_REQUESTS") {
            config.request_budget = Some(parse_var("LINKAGE_MAX_REQUESTS", &v)?);
        }
        if let Some(v) = lookup("LINKAGE_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout_secs = parse_var("LINKAGE_FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_PAGE_SIZE") {
            config.page_size = parse_var("LINKAGE_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_CONCURRENCY") {
            config.concurrency = parse_var::<usize>("LINKAGE_CONCURRENCY", &v)?.max(1);
        }
        if let Some(v) = lookup("LINKAGE_SLEEP") {
            config.inter_request_sleep_secs = parse_var("LINKAGE_SLEEP", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_FALLBACK_TYPES") {
            let parsed: Vec<Category> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|label| {
                    let category = Category::parse(label);
                    if category.is_none() {
                        warn!("Ignoring unknown fallback type '{}'", label);
                    }
                    category
                })
                .collect();
            if !parsed.is_empty() {
                config.fallback_categories = parsed;
            }
        }
        if let Some(v) = lookup("LINKAGE_TEMPLATE_THRESHOLD") {
            config.template_match_threshold = parse_var("LINKAGE_TEMPLATE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("LINKAGE_OVERRIDES") {
            config.override_map = serde_json::from_str(&v)
                .context("LINKAGE_OVERRIDES must be a JSON object of label -> id")?;
        }

        debug!("Resolved match configuration: {:?}", config);
        Ok(config)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_base_seconds.max(0.0))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn inter_request_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.inter_request_sleep_secs.max(0.0))
    }
}

/// Parses a comma-separated threshold list, dropping unparsable entries.
/// Falls back to the default ladder when nothing usable remains.
pub fn parse_thresholds(value: &str) -> Vec<f64> {
    let parsed: Vec<f64> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect();
    if parsed.is_empty() {
        DEFAULT_THRESHOLDS.to_vec()
    } else {
        parsed
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("Invalid value '{}' for {}", value, key))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Loads the first env file found in [`ENV_PATHS`]. Existing variables win.
pub fn load_env() -> bool {
    for path in ENV_PATHS.iter() {
        if Path::new(path).exists() {
            match dotenv::from_path(path) {
                Ok(()) => {
                    info!("Loaded environment variables from {}", path);
                    return true;
                }
                Err(e) => warn!("Failed to load environment from {}: {}", path, e),
            }
        }
    }
    info!("No .env file found, using environment variables from system");
    false
}
