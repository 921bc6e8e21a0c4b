// src/catalog.rs
//
// Loaders for reference catalogs (FDC export, region list, dish templates)
// and for the item files that are matched against them.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;

use crate::error::{MatchError, SkipLog, SkipReason};
use crate::matching::index::{BuildStats, IndexSettings, TokenIndex};
use crate::matching::template::{DishTemplate, GroceryRawMap};
use crate::models::{Category, CategoryFilter, FoodKind, MatchQuery, RecordId, ReferenceRecord, TextForm};

pub const FDC_FOOD_FILE: &str = "food.csv";
pub const REGION_LISTING_URL: &str = "https://download.bbbike.org/osm/bbbike/";

/// Records read from a catalog source plus the rows that were dropped.
#[derive(Debug, Default)]
pub struct LoadedCatalog {
    pub records: Vec<ReferenceRecord>,
    pub skipped: SkipLog,
    /// Rows outside the loader's allowed categories. Not errors.
    pub filtered: usize,
}

/// A source of reference records.
pub trait CatalogLoader {
    fn describe(&self) -> String;

    /// Fails with [`MatchError::IndexBuild`] when the source or a required
    /// column is missing. Bad rows are skipped and logged instead.
    fn load(&self) -> Result<LoadedCatalog, MatchError>;
}

/// Loads a catalog and indexes it in one step.
pub fn build_index(
    loader: &dyn CatalogLoader,
    settings: IndexSettings,
) -> Result<(TokenIndex, BuildStats, SkipLog), MatchError> {
    info!("Loading catalog from {}", loader.describe());
    let start = Instant::now();
    let catalog = loader.load()?;
    info!(
        "Read {} records from {} in {:.2?} ({} skipped, {} filtered out)",
        catalog.records.len(),
        loader.describe(),
        start.elapsed(),
        catalog.skipped.len(),
        catalog.filtered
    );
    let (index, stats) = TokenIndex::build(catalog.records, settings);
    Ok((index, stats, catalog.skipped))
}

//------------------------------------------------------------------------------
// FDC BULK EXPORT
//------------------------------------------------------------------------------

/// Reads `food.csv` from a FoodData Central bulk download.
#[derive(Debug, Clone)]
pub struct FdcCsvLoader {
    path: PathBuf,
    allowed: Option<HashSet<Category>>,
}

impl FdcCsvLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            allowed: None,
        }
    }

    /// `dir/food.csv`
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(FDC_FOOD_FILE))
    }

    pub fn allow<I: IntoIterator<Item = Category>>(self, categories: I) -> Self {
        Self {
            allowed: Some(categories.into_iter().collect()),
            ..self
        }
    }
}

impl CatalogLoader for FdcCsvLoader {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<LoadedCatalog, MatchError> {
        if !self.path.exists() {
            return Err(MatchError::IndexBuild(format!(
                "{} not found",
                self.path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| MatchError::IndexBuild(format!("cannot open {}: {}", self.path.display(), e)))?;
        let headers = reader
            .headers()
            .map_err(|e| MatchError::IndexBuild(format!("cannot read header of {}: {}", self.path.display(), e)))?
            .clone();

        let column = |name: &str| -> Result<usize, MatchError> {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}') == name)
                .ok_or_else(|| {
                    MatchError::IndexBuild(format!("{} is missing column '{}'", self.path.display(), name))
                })
        };
        let idx_id = column("fdc_id")?;
        let idx_type = column("data_type")?;
        let idx_description = column("description")?;

        let mut catalog = LoadedCatalog::default();
        for (i, row) in reader.records().enumerate() {
            // header is line 1
            let line = i + 2;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    catalog.skipped.record(SkipReason::MalformedRow, line, e.to_string());
                    continue;
                }
            };

            let data_type = row.get(idx_type).unwrap_or("").trim();
            let category = match Category::from_local_label(data_type) {
                Some(category) => category,
                None => {
                    // Other FDC data types (sample_food, sub_sample_food, ...) are not matchable
                    catalog.filtered += 1;
                    continue;
                }
            };
            if let Some(allowed) = &self.allowed {
                if !allowed.contains(&category) {
                    catalog.filtered += 1;
                    continue;
                }
            }

            let description = row.get(idx_description).unwrap_or("").trim();
            if description.is_empty() {
                catalog.skipped.record(SkipReason::EmptyText, line, "blank description");
                continue;
            }

            let raw_id = row.get(idx_id).unwrap_or("").trim();
            if raw_id.parse::<i64>().is_err() {
                catalog
                    .skipped
                    .record(SkipReason::BadId, line, format!("fdc_id '{}' is not an integer", raw_id));
                continue;
            }

            catalog
                .records
                .push(ReferenceRecord::new(RecordId::from(raw_id), category, description));
        }
        Ok(catalog)
    }
}

//------------------------------------------------------------------------------
// REGIONS
//------------------------------------------------------------------------------

/// Region names, one per line (`#` starts a comment), or an in-memory list.
#[derive(Debug, Clone)]
pub enum RegionListLoader {
    File(PathBuf),
    Names(Vec<String>),
}

impl CatalogLoader for RegionListLoader {
    fn describe(&self) -> String {
        match self {
            RegionListLoader::File(path) => path.display().to_string(),
            RegionListLoader::Names(names) => format!("{} inline region names", names.len()),
        }
    }

    fn load(&self) -> Result<LoadedCatalog, MatchError> {
        let names: Vec<String> = match self {
            RegionListLoader::Names(names) => names.clone(),
            RegionListLoader::File(path) => {
                let file = File::open(path).map_err(|e| {
                    MatchError::IndexBuild(format!("cannot open region list {}: {}", path.display(), e))
                })?;
                let mut names = Vec::new();
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    let name = line.split('#').next().unwrap_or("").trim();
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
                names
            }
        };

        // Names sharing a compact key collapse into one region. The slot
        // stays where the key first appeared; the last name listed wins.
        let mut catalog = LoadedCatalog::default();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for (i, name) in names.into_iter().enumerate() {
            let name = name.trim().to_string();
            if name.is_empty() {
                catalog.skipped.record(SkipReason::EmptyText, i + 1, "blank region name");
                continue;
            }
            let record = ReferenceRecord::with_form(
                RecordId(name.clone()),
                Category::Region,
                name,
                TextForm::Compact,
            );
            match slots.get(record.normalized_text()).copied() {
                Some(slot) => {
                    debug!(
                        "Region '{}' replaces '{}' (same key '{}')",
                        record.id(),
                        catalog.records[slot].id(),
                        record.normalized_text()
                    );
                    catalog.records[slot] = record;
                }
                None => {
                    slots.insert(record.normalized_text().to_string(), catalog.records.len());
                    catalog.records.push(record);
                }
            }
        }
        Ok(catalog)
    }
}

/// Region slugs linked from a directory listing page, sorted and unique.
pub fn parse_region_listing(html: &str) -> Vec<String> {
    let pattern = match Regex::new(r#"href="([A-Za-z0-9_-]+)/""#) {
        Ok(pattern) => pattern,
        Err(_) => return Vec::new(),
    };
    let mut regions: Vec<String> = pattern
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    regions.sort();
    regions.dedup();
    regions
}

/// Downloads and parses the region listing page.
pub async fn fetch_region_listing(url: &str) -> Result<Vec<String>> {
    let html = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to fetch region listing from {}", url))?
        .error_for_status()
        .with_context(|| format!("Region listing at {} returned an error status", url))?
        .text()
        .await
        .context("Failed to read region listing body")?;
    let regions = parse_region_listing(&html);
    info!("Found {} regions at {}", regions.len(), url);
    Ok(regions)
}

/// City name occurrence counts from an orders export (`City_Name` column),
/// most frequent first, ties in first-seen order.
pub fn load_city_counts(path: &Path) -> Result<Vec<(String, usize)>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open orders file: {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let idx_city = headers
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == "City_Name")
        .with_context(|| format!("{} has no City_Name column", path.display()))?;

    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for (i, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping order row {}: {}", i + 2, e);
                continue;
            }
        };
        let city = row.get(idx_city).unwrap_or("").trim();
        if city.is_empty() {
            continue;
        }
        let count = counts.entry(city.to_string()).or_insert(0);
        if *count == 0 {
            order.push(city.to_string());
        }
        *count += 1;
    }

    let mut ranked: Vec<(String, usize)> = order
        .into_iter()
        .map(|city| {
            let count = counts.get(&city).copied().unwrap_or(0);
            (city, count)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(ranked)
}

//------------------------------------------------------------------------------
// DISH TEMPLATES
//------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TemplateFile {
    List(Vec<serde_json::Value>),
    Bundle {
        #[serde(default)]
        canonical_foods: Vec<serde_json::Value>,
        #[serde(default)]
        grocery_raw: HashMap<String, String>,
    },
}

/// Dish templates and the raw grocery dictionary.
#[derive(Debug, Default)]
pub struct TemplateSet {
    pub dishes: Vec<DishTemplate>,
    pub grocery_raw: GroceryRawMap,
    pub skipped: SkipLog,
}

/// Reads every `*.json` file under `<dir>/dishes`, in file-name order.
#[derive(Debug, Clone)]
pub struct DishTemplateLoader {
    dir: PathBuf,
}

impl DishTemplateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn dishes_dir(&self) -> PathBuf {
        self.dir.join("dishes")
    }

    pub fn load_templates(&self) -> Result<TemplateSet, MatchError> {
        let dir = self.dishes_dir();
        if !dir.is_dir() {
            return Err(MatchError::IndexBuild(format!(
                "template directory {} not found",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        files.sort();

        let mut set = TemplateSet::default();
        let mut grocery: Vec<(String, String)> = Vec::new();
        let mut row = 0usize;
        for file in files {
            let content = std::fs::read_to_string(&file)?;
            let parsed: TemplateFile = serde_json::from_str(&content).map_err(|e| {
                MatchError::IndexBuild(format!("cannot parse {}: {}", file.display(), e))
            })?;
            let (entries, raw_map) = match parsed {
                TemplateFile::Bundle {
                    canonical_foods,
                    grocery_raw,
                } => (canonical_foods, grocery_raw),
                TemplateFile::List(entries) => (entries, HashMap::new()),
            };

            for value in entries {
                row += 1;
                match serde_json::from_value::<DishTemplate>(value) {
                    Ok(t) if t.canonical_food_id.trim().is_empty() || t.name.trim().is_empty() => {
                        set.skipped.record(SkipReason::EmptyText, row, "template without id or name");
                    }
                    Ok(t) => set.dishes.push(t),
                    Err(e) => set.skipped.record(
                        SkipReason::MalformedRow,
                        row,
                        format!("{}: {}", file.display(), e),
                    ),
                }
            }
            let mut raw_entries: Vec<(String, String)> = raw_map.into_iter().collect();
            raw_entries.sort();
            grocery.extend(raw_entries);
        }

        set.grocery_raw = GroceryRawMap::new(grocery);
        debug!(
            "Loaded {} dish templates and {} grocery keys from {}",
            set.dishes.len(),
            set.grocery_raw.len(),
            dir.display()
        );
        Ok(set)
    }
}

impl CatalogLoader for DishTemplateLoader {
    fn describe(&self) -> String {
        self.dishes_dir().display().to_string()
    }

    fn load(&self) -> Result<LoadedCatalog, MatchError> {
        let set = self.load_templates()?;
        Ok(LoadedCatalog {
            records: set.dishes.iter().flat_map(DishTemplate::to_records).collect(),
            skipped: set.skipped,
            filtered: 0,
        })
    }
}

//------------------------------------------------------------------------------
// ITEMS
//------------------------------------------------------------------------------

/// One purchased line item to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRow {
    pub item_name: String,
    pub merchant_name: String,
    pub food_kind: Option<FoodKind>,
}

impl ItemRow {
    /// Query with the item's category routing and the merchant as secondary signal.
    pub fn to_query(&self, fallback: &[Category]) -> MatchQuery {
        MatchQuery::new(self.item_name.clone())
            .with_filter(CategoryFilter::for_food_kind(self.food_kind, fallback))
            .with_secondary(self.merchant_name.clone())
            .with_food_kind(self.food_kind)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ItemLine {
    #[serde(default)]
    item: ItemFields,
    #[serde(default)]
    interpretation: Option<KindFields>,
    #[serde(default)]
    classification: Option<KindFields>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemFields {
    #[serde(default)]
    item_name_raw: Option<String>,
    #[serde(default)]
    merchant_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KindFields {
    #[serde(default)]
    food_kind: Option<String>,
}

/// Items from `.jsonl` (classified pipeline output) or CSV (`Item_Name`,
/// `Restaurant_Name`). Rows with an empty item name are skipped.
pub fn load_items(path: &Path) -> Result<(Vec<ItemRow>, SkipLog)> {
    let is_jsonl = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false);
    if is_jsonl {
        load_items_jsonl(path)
    } else {
        load_items_csv(path)
    }
}

fn load_items_csv(path: &Path) -> Result<(Vec<ItemRow>, SkipLog)> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open items file: {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let find = |name: &str| headers.iter().position(|h| h.trim_start_matches('\u{feff}') == name);
    let idx_item = find("Item_Name")
        .with_context(|| format!("{} has no Item_Name column", path.display()))?;
    let idx_merchant = find("Restaurant_Name");

    let mut items = Vec::new();
    let mut skipped = SkipLog::new();
    for (i, row) in reader.records().enumerate() {
        let line = i + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                skipped.record(SkipReason::MalformedRow, line, e.to_string());
                continue;
            }
        };
        let item_name = row.get(idx_item).unwrap_or("").trim();
        if item_name.is_empty() {
            skipped.record(SkipReason::EmptyText, line, "empty Item_Name");
            continue;
        }
        let merchant_name = idx_merchant
            .and_then(|idx| row.get(idx))
            .unwrap_or("")
            .trim();
        items.push(ItemRow {
            item_name: item_name.to_string(),
            merchant_name: merchant_name.to_string(),
            food_kind: None,
        });
    }
    Ok((items, skipped))
}

fn load_items_jsonl(path: &Path) -> Result<(Vec<ItemRow>, SkipLog)> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open items file: {}", path.display()))?;
    let mut items = Vec::new();
    let mut skipped = SkipLog::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line_no = i + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ItemLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                skipped.record(SkipReason::MalformedRow, line_no, e.to_string());
                continue;
            }
        };

        let item_name = parsed.item.item_name_raw.unwrap_or_default().trim().to_string();
        if item_name.is_empty() {
            skipped.record(SkipReason::EmptyText, line_no, "empty item_name_raw");
            continue;
        }
        let kind_label = parsed
            .interpretation
            .and_then(|k| k.food_kind)
            .filter(|k| !k.trim().is_empty())
            .or_else(|| parsed.classification.and_then(|k| k.food_kind));
        let food_kind = kind_label.as_deref().and_then(|label| {
            let kind = FoodKind::parse(label);
            if kind.is_none() {
                debug!("Line {}: unknown food_kind '{}', using fallback types", line_no, label);
            }
            kind
        });

        items.push(ItemRow {
            item_name,
            merchant_name: parsed.item.merchant_name.unwrap_or_default().trim().to_string(),
            food_kind,
        });
    }
    Ok((items, skipped))
}

/// De-duplicates on (item name, food kind) when `unique_only` or
/// `max_unique` is set, keeping first-seen order and stopping at
/// `max_unique`; then keeps the first `max_items`.
pub fn limit_items(
    items: Vec<ItemRow>,
    max_items: Option<usize>,
    max_unique: Option<usize>,
    unique_only: bool,
) -> Vec<ItemRow> {
    let mut items = items;
    if unique_only || max_unique.is_some() {
        let mut seen: HashSet<(String, Option<FoodKind>)> = HashSet::new();
        let mut limited = Vec::new();
        for item in items {
            if !seen.insert((item.item_name.clone(), item.food_kind)) {
                continue;
            }
            limited.push(item);
            if max_unique.map(|m| limited.len() >= m).unwrap_or(false) {
                break;
            }
        }
        items = limited;
    }
    if let Some(max) = max_items {
        items.truncate(max);
    }
    items
}
