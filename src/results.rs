// src/results.rs

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::matching::normalize::normalize_key;
use crate::models::MatchResult;

// Bucket name for items without a food kind
const UNKNOWN_KIND: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingStats {
    pub mapping_sec: f64,
    pub avg_item_ms: f64,
    pub index_build_sec: Option<f64>,
}

/// Distribution of candidate set sizes over all results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateStats {
    pub avg: f64,
    pub median: f64,
    pub max: usize,
}

/// Complete statistics for one batch run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_timestamp: DateTime<Utc>,
    pub matcher: String,

    pub total_items: usize,
    /// Distinct (item name, food kind) pairs.
    pub unique_items: usize,
    pub matched_items: usize,
    /// Percentage of items matched, rounded to two decimals.
    pub match_rate: f64,

    pub per_kind: BTreeMap<String, usize>,
    pub matched_per_kind: BTreeMap<String, usize>,
    pub per_method: BTreeMap<String, usize>,
    pub fetch_errors: usize,
    pub skipped_rows: usize,

    pub timing: TimingStats,
    pub candidate_stats: CandidateStats,
}

impl RunSummary {
    pub fn from_results(
        matcher: &str,
        results: &[MatchResult],
        mapping_elapsed: Duration,
        index_build: Option<Duration>,
        skipped_rows: usize,
    ) -> Self {
        let total_items = results.len();
        let mut unique: HashSet<(&str, &str)> = HashSet::new();
        let mut per_kind = BTreeMap::new();
        let mut matched_per_kind = BTreeMap::new();
        let mut per_method = BTreeMap::new();
        let mut matched_items = 0;
        let mut fetch_errors = 0;

        for result in results {
            let kind = kind_label(result);
            unique.insert((result.query.raw_text.as_str(), kind));
            *per_kind.entry(kind.to_string()).or_insert(0) += 1;
            *per_method.entry(result.method.label()).or_insert(0) += 1;
            if result.is_matched() {
                matched_items += 1;
                *matched_per_kind.entry(kind.to_string()).or_insert(0) += 1;
            }
            if result.fetch_error.is_some() {
                fetch_errors += 1;
            }
        }

        let match_rate = if total_items == 0 {
            0.0
        } else {
            round2(100.0 * matched_items as f64 / total_items as f64)
        };

        let mapping_sec = mapping_elapsed.as_secs_f64();
        let avg_item_ms = if total_items == 0 {
            0.0
        } else {
            round2(mapping_sec * 1000.0 / total_items as f64)
        };

        let counts: Vec<usize> = results.iter().map(|r| r.candidate_count).collect();

        Self {
            run_id: Uuid::new_v4().to_string(),
            run_timestamp: Utc::now(),
            matcher: matcher.to_string(),
            total_items,
            unique_items: unique.len(),
            matched_items,
            match_rate,
            per_kind,
            matched_per_kind,
            per_method,
            fetch_errors,
            skipped_rows,
            timing: TimingStats {
                mapping_sec: round2(mapping_sec),
                avg_item_ms,
                index_build_sec: index_build.map(|d| round2(d.as_secs_f64())),
            },
            candidate_stats: candidate_stats(&counts),
        }
    }

    pub fn log_summary(&self) {
        info!("Run {} summary ({}):", self.run_id, self.matcher);
        info!(
            "  Items: {} total, {} unique, {} matched ({:.2}%)",
            self.total_items, self.unique_items, self.matched_items, self.match_rate
        );
        for (kind, total) in &self.per_kind {
            let matched = self.matched_per_kind.get(kind).copied().unwrap_or(0);
            info!("  {}: {}/{} matched", kind, matched, total);
        }
        for (method, count) in &self.per_method {
            info!("  method {}: {}", method, count);
        }
        info!(
            "  Candidates per item: avg {:.1}, median {:.1}, max {}",
            self.candidate_stats.avg, self.candidate_stats.median, self.candidate_stats.max
        );
        info!(
            "  Mapping took {:.2}s ({:.2} ms/item), {} fetch errors, {} skipped rows",
            self.timing.mapping_sec, self.timing.avg_item_ms, self.fetch_errors, self.skipped_rows
        );
    }
}

fn kind_label(result: &MatchResult) -> &'static str {
    result
        .query
        .food_kind
        .map(|k| k.as_str())
        .unwrap_or(UNKNOWN_KIND)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn candidate_stats(counts: &[usize]) -> CandidateStats {
    if counts.is_empty() {
        return CandidateStats::default();
    }
    let mut sorted = counts.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    };
    CandidateStats {
        avg: round2(sorted.iter().sum::<usize>() as f64 / sorted.len() as f64),
        median,
        max: sorted[sorted.len() - 1],
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a RunSummary,
    results: &'a [MatchResult],
}

/// Writes `{summary, results}` as pretty JSON.
pub fn write_report_json(path: &Path, summary: &RunSummary, results: &[MatchResult]) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &Report { summary, results })
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    writer.flush()?;
    info!("Wrote JSON report with {} results to {}", results.len(), path.display());
    Ok(())
}

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    item_name: &'a str,
    merchant_name: &'a str,
    food_kind: &'a str,
    data_types: String,
    fdc_id: &'a str,
    description: &'a str,
    data_type: &'a str,
    brand: &'a str,
    score: f64,
    method: String,
    candidates: usize,
    fetch_error: &'a str,
}

impl<'a> ReportRow<'a> {
    fn from_result(result: &'a MatchResult) -> Self {
        Self {
            item_name: &result.query.raw_text,
            merchant_name: result.query.secondary_text.as_deref().unwrap_or(""),
            food_kind: result.query.food_kind.map(|k| k.as_str()).unwrap_or(""),
            data_types: result
                .query
                .category_filter
                .as_ref()
                .map(|f| f.api_labels())
                .unwrap_or_default(),
            fdc_id: result.matched_record_id.as_ref().map(|id| id.as_str()).unwrap_or(""),
            description: result.matched_text.as_deref().unwrap_or(""),
            data_type: result.matched_category.map(|c| c.api_label()).unwrap_or(""),
            brand: result.matched_secondary.as_deref().unwrap_or(""),
            score: round2(result.score),
            method: result.method.label(),
            candidates: result.candidate_count,
            fetch_error: result.fetch_error.as_deref().unwrap_or(""),
        }
    }
}

/// One CSV row per result, matched or not.
pub fn write_report_csv(path: &Path, results: &[MatchResult]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for result in results {
        writer.serialize(ReportRow::from_result(result))?;
    }
    writer.flush()?;
    info!("Wrote CSV report with {} rows to {}", results.len(), path.display());
    Ok(())
}

/// A resolved item, keyed for reuse by later pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct MappingEntry {
    pub item_key: String,
    pub merchant_name: String,
    pub item_name: String,
    pub food_kind: Option<String>,
    pub fdc_id: String,
    pub description: Option<String>,
    pub data_type: Option<String>,
    pub score: f64,
}

impl MappingEntry {
    /// `None` for unmatched results.
    pub fn from_result(result: &MatchResult) -> Option<Self> {
        let id = result.matched_record_id.as_ref()?;
        let merchant = result.query.secondary_text.clone().unwrap_or_default();
        Some(Self {
            item_key: normalize_key(&format!("{}#{}", merchant, result.query.raw_text)),
            merchant_name: merchant,
            item_name: result.query.raw_text.clone(),
            food_kind: result.query.food_kind.map(|k| k.as_str().to_string()),
            fdc_id: id.as_str().to_string(),
            description: result.matched_text.clone(),
            data_type: result.matched_category.map(|c| c.api_label().to_string()),
            score: round2(result.score),
        })
    }
}

/// Writes matched results as JSONL mapping entries. Returns the number written.
pub fn write_mapping_cache(path: &Path, results: &[MatchResult]) -> Result<usize> {
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for entry in results.iter().filter_map(MappingEntry::from_result) {
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;
    info!("Wrote {} mapping entries to {}", written, path.display());
    Ok(written)
}
