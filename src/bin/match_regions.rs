// src/bin/match_regions.rs
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    env,
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use linkage_lib::{
    batch::run_batch,
    catalog::{self, CatalogLoader, RegionListLoader, REGION_LISTING_URL},
    config::{self, MatchConfig},
    matching::RegionMatcher,
    models::{MatchQuery, MatchResult},
};

const DEFAULT_SUMMARY_PATH: &str = "output/region_summary.json";
const DEFAULT_SUGGESTIONS: usize = 3;
const CITIES_LOGGED: usize = 20;

/// Written to the summary file: cities grouped under the region they matched.
#[derive(Debug, Serialize)]
struct RegionSummary {
    cities_total: usize,
    cities_matched: usize,
    regions: BTreeMap<String, Vec<String>>,
    unmatched: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let start_time = Instant::now();

    config::load_env();
    let config = MatchConfig::from_env().context("Failed to read match configuration")?;

    info!("Phase 1: Loading cities and regions");
    let orders = env::var("LINKAGE_ORDERS")
        .map(PathBuf::from)
        .context("LINKAGE_ORDERS must point to an orders CSV with a City_Name column")?;
    let cities = catalog::load_city_counts(&orders)?;
    info!("Detected {} distinct cities in {}", cities.len(), orders.display());
    for (city, count) in cities.iter().take(CITIES_LOGGED) {
        info!("  {} ({})", city, count);
    }

    let loader = match env::var("LINKAGE_REGIONS_FILE") {
        Ok(path) if !path.trim().is_empty() => RegionListLoader::File(PathBuf::from(path)),
        _ => {
            let url = env::var("LINKAGE_REGIONS_URL").unwrap_or_else(|_| REGION_LISTING_URL.to_string());
            RegionListLoader::Names(catalog::fetch_region_listing(&url).await?)
        }
    };
    let regions = loader
        .load()
        .with_context(|| format!("Failed to load regions from {}", loader.describe()))?;
    let matcher = Arc::new(RegionMatcher::new(regions.records, &config));
    info!("Loaded {} regions from {}", matcher.len(), loader.describe());

    info!("Phase 2: Matching cities against thresholds {:?}", config.thresholds);
    let queries: Vec<MatchQuery> = cities
        .iter()
        .map(|(city, _)| MatchQuery::new(city.clone()))
        .collect();
    let batch = run_batch(matcher.clone(), queries, config.concurrency).await;
    info!("Matched {} cities in {:.2?}", batch.results.len(), batch.elapsed);
    let results: Vec<(usize, MatchResult)> = cities
        .iter()
        .map(|(_, count)| *count)
        .zip(batch.results)
        .collect();

    let suggestions = match env::var("LINKAGE_SUGGESTIONS") {
        Ok(v) => v
            .trim()
            .parse::<usize>()
            .with_context(|| format!("Invalid value '{}' for LINKAGE_SUGGESTIONS", v))?,
        Err(_) => DEFAULT_SUGGESTIONS,
    };

    let mut summary = RegionSummary {
        cities_total: results.len(),
        cities_matched: 0,
        regions: BTreeMap::new(),
        unmatched: Vec::new(),
    };
    for (count, result) in &results {
        let city = &result.query.raw_text;
        match &result.matched_record_id {
            Some(region) => {
                info!(
                    "{} -> {} ({}, {:.1}) [{} orders]",
                    city, region, result.method, result.score, count
                );
                summary.cities_matched += 1;
                summary
                    .regions
                    .entry(region.to_string())
                    .or_default()
                    .push(city.clone());
            }
            None => {
                let suggested: Vec<String> = matcher
                    .suggest(city, suggestions)
                    .into_iter()
                    .map(|s| format!("{} ({:.1})", s.name, s.score))
                    .collect();
                warn!(
                    "Unmatched city '{}' [{} orders], best {:.1}; suggestions: {}",
                    city,
                    count,
                    result.score,
                    suggested.join(", ")
                );
                summary.unmatched.push(city.clone());
            }
        }
    }

    info!("Phase 3: Writing summary");
    let output = env::var("LINKAGE_REGION_SUMMARY")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SUMMARY_PATH));
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(&output).with_context(|| format!("Failed to create {}", output.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)?;

    info!(
        "Region matching completed in {:.2?}: {}/{} cities matched into {} regions, summary at {}",
        start_time.elapsed(),
        summary.cities_matched,
        summary.cities_total,
        summary.regions.len(),
        output.display()
    );
    Ok(())
}
