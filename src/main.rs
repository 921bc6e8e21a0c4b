// src/main.rs
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::{
    env,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use uuid::Uuid;

use linkage_lib::{
    batch::run_batch,
    cache::ResultCache,
    catalog::{self, DishTemplateLoader, FdcCsvLoader, ItemRow},
    config::{self, MatchConfig},
    fetch::FdcClient,
    matching::{
        index::IndexSettings, local::FDC_LOCAL_MATCHER_ID, remote::FDC_REMOTE_MATCHER_ID,
        template::DISH_TEMPLATE_MATCHER_ID, DishTemplateMatcher, GroceryRawMap,
        LocalCatalogMatcher, RemoteCatalogMatcher,
    },
    models::{FoodKind, MatchQuery, MatchResult, RemoteFood},
    registry::MatcherRegistry,
    results::{self, RunSummary},
};

const DEFAULT_CACHE_PATH: &str = "cache/fdc_search.jsonl";
const DEFAULT_OUTPUT_PATH: &str = "output/fdc_mapping_report.json";
const DEMO_API_KEY: &str = "DEMO_KEY";

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("Invalid value '{}' for {}", v, key)),
        _ => Ok(None),
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let run_id = Uuid::new_v4().to_string();
    info!("Starting FDC mapping run {}", run_id);
    let start_time = Instant::now();

    config::load_env();
    let config = MatchConfig::from_env().context("Failed to read match configuration")?;

    // Phase 1: items
    info!("Phase 1: Loading items");
    let items_path = env_path("LINKAGE_ITEMS").context("LINKAGE_ITEMS must point to a CSV or JSONL items file")?;
    let (items, skipped) = catalog::load_items(&items_path)?;
    let loaded = items.len();
    let items = catalog::limit_items(
        items,
        env_usize("LINKAGE_MAX_ITEMS")?,
        env_usize("LINKAGE_MAX_UNIQUE")?,
        env_flag("LINKAGE_UNIQUE_ONLY"),
    );
    info!(
        "Loaded {} items from {} ({} after limits, {} rows skipped)",
        loaded,
        items_path.display(),
        items.len(),
        skipped.len()
    );

    // Phase 2: matchers
    info!("Phase 2: Building matchers");
    let mut registry = MatcherRegistry::new();
    let mut index_build: Option<Duration> = None;
    let primary_id = match env_path("LINKAGE_FDC_DIR") {
        Some(dir) => {
            let phase_start = Instant::now();
            let (index, stats, index_skipped) = catalog::build_index(
                &FdcCsvLoader::from_dir(&dir),
                IndexSettings::from_config(&config),
            )
            .with_context(|| format!("Failed to index FDC export in {}", dir.display()))?;
            index_build = Some(phase_start.elapsed());
            info!(
                "Indexed {} records ({} terms, {} postings, {} rows skipped) in {:.2?}",
                stats.records_indexed,
                stats.distinct_terms,
                stats.postings,
                index_skipped.len(),
                phase_start.elapsed()
            );
            registry.register(Arc::new(LocalCatalogMatcher::new(Arc::new(index), &config)))?;
            FDC_LOCAL_MATCHER_ID
        }
        None => {
            let api_key = match env::var("FDC_API_KEY") {
                Ok(key) if !key.trim().is_empty() => key,
                _ => {
                    warn!("FDC_API_KEY is not set, using {} (heavily rate limited)", DEMO_API_KEY);
                    DEMO_API_KEY.to_string()
                }
            };
            let cache_path = env_path("LINKAGE_CACHE").unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH));
            let cache: ResultCache<Vec<RemoteFood>> = ResultCache::open(&cache_path)
                .with_context(|| format!("Failed to open cache {}", cache_path.display()))?;
            let client = FdcClient::new(&api_key, &config)?;
            registry.register(Arc::new(RemoteCatalogMatcher::new(
                Arc::new(client),
                Arc::new(cache),
                &config,
            )))?;
            FDC_REMOTE_MATCHER_ID
        }
    };

    let mut grocery_raw = GroceryRawMap::default();
    if let Some(dir) = env_path("LINKAGE_TEMPLATES") {
        let templates = DishTemplateLoader::new(dir.clone())
            .load_templates()
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?;
        info!(
            "Loaded {} dish templates and {} grocery keys from {}",
            templates.dishes.len(),
            templates.grocery_raw.len(),
            dir.display()
        );
        registry.register(Arc::new(DishTemplateMatcher::new(templates.dishes, &config)))?;
        grocery_raw = templates.grocery_raw;
    }

    let matcher_id = env::var("LINKAGE_MATCHER").unwrap_or_else(|_| primary_id.to_string());
    let matcher = registry.require(matcher_id.trim())?;
    info!("Using matcher '{}' (registered: {})", matcher.id(), registry.ids().join(", "));

    // Phase 3: matching
    info!("Phase 3: Matching {} items", items.len());
    let phase_start = Instant::now();
    let queries: Vec<MatchQuery> = items
        .iter()
        .map(|item| build_query(item, matcher.id(), &config))
        .collect();

    let (prefilled, pending) = route_grocery_raw(&grocery_raw, queries);
    info!(
        "{} grocery items resolved by dictionary, {} sent to '{}'",
        prefilled.iter().filter(|r| r.is_some()).count(),
        pending.len(),
        matcher.id()
    );
    let batch = run_batch(matcher.clone(), pending, config.concurrency).await;
    let all_results = merge_results(prefilled, batch.results)?;
    let mapping_elapsed = phase_start.elapsed();
    info!("Phase 3 completed in {:.2?}", mapping_elapsed);

    // Phase 4: reports
    info!("Phase 4: Writing reports");
    let mut summary = RunSummary::from_results(
        matcher.id(),
        &all_results,
        mapping_elapsed,
        index_build,
        skipped.len(),
    );
    summary.run_id = run_id;
    summary.log_summary();

    let output = env_path("LINKAGE_OUTPUT").unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));
    results::write_report_json(&output, &summary, &all_results)?;
    if let Some(csv_path) = env_path("LINKAGE_CSV") {
        results::write_report_csv(&csv_path, &all_results)?;
    }
    if let Some(mapping_path) = env_path("LINKAGE_MAPPING_CACHE") {
        results::write_mapping_cache(&mapping_path, &all_results)?;
    }

    info!(
        "Run completed in {:.2?}. {} of {} items matched",
        start_time.elapsed(),
        summary.matched_items,
        summary.total_items
    );
    Ok(())
}

/// Dish templates are searched without FDC routing; everything else gets
/// its food kind's data types.
fn build_query(item: &ItemRow, matcher_id: &str, config: &MatchConfig) -> MatchQuery {
    if matcher_id == DISH_TEMPLATE_MATCHER_ID {
        MatchQuery::new(item.item_name.clone())
            .with_secondary(item.merchant_name.clone())
            .with_food_kind(item.food_kind)
    } else {
        item.to_query(&config.fallback_categories)
    }
}

/// Resolves grocery_raw items found in the dictionary up front. Returns one
/// slot per query (filled for dictionary hits) and the queries left over.
fn route_grocery_raw(
    grocery_raw: &GroceryRawMap,
    queries: Vec<MatchQuery>,
) -> (Vec<Option<MatchResult>>, Vec<MatchQuery>) {
    let mut slots = Vec::with_capacity(queries.len());
    let mut pending = Vec::new();
    for query in queries {
        if query.food_kind == Some(FoodKind::GroceryRaw) && !grocery_raw.is_empty() {
            let result = grocery_raw.resolve_now(&query);
            if result.is_matched() {
                slots.push(Some(result));
                continue;
            }
        }
        slots.push(None);
        pending.push(query);
    }
    (slots, pending)
}

fn merge_results(slots: Vec<Option<MatchResult>>, resolved: Vec<MatchResult>) -> Result<Vec<MatchResult>> {
    let mut resolved = resolved.into_iter();
    let mut merged = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Some(result) => merged.push(result),
            None => match resolved.next() {
                Some(result) => merged.push(result),
                None => bail!("Batch returned fewer results than queries"),
            },
        }
    }
    Ok(merged)
}
