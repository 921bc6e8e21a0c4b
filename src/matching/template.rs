// src/matching/template.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::MatchConfig;
use crate::matching::index::{IndexSettings, TokenIndex};
use crate::matching::local::{CandidateSource, LocalCatalogMatcher};
use crate::matching::normalize::normalize;
use crate::matching::policy::{AcceptancePolicy, OverrideMap};
use crate::matching::Matcher;
use crate::models::{Category, FoodKind, MatchMethod, MatchQuery, MatchResult, RecordId, ReferenceRecord};

pub const DISH_TEMPLATE_MATCHER_ID: &str = "dish_template";

// Confidence assumed when a template does not state one
pub const DEFAULT_TEMPLATE_CONFIDENCE: f64 = 0.7;

fn default_confidence() -> f64 {
    DEFAULT_TEMPLATE_CONFIDENCE
}

/// A canonical dish and the names it is sold under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishTemplate {
    pub canonical_food_id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub food_kind: Option<FoodKind>,
    #[serde(default)]
    pub default_ingredient_profile_id: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl DishTemplate {
    /// The name followed by every distinct non-empty alias.
    pub fn all_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for alias in &self.aliases {
            let alias = alias.trim();
            if !alias.is_empty() && !names.contains(&alias) {
                names.push(alias);
            }
        }
        names
    }

    /// One record per name, all carrying the canonical food id.
    pub fn to_records(&self) -> Vec<ReferenceRecord> {
        self.all_names()
            .into_iter()
            .map(|name| {
                ReferenceRecord::new(
                    RecordId(self.canonical_food_id.clone()),
                    Category::Dish,
                    name,
                )
            })
            .collect()
    }
}

/// A dish match with the template's confidence applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DishMapping {
    pub canonical_food_id: String,
    pub ingredient_profile_id: Option<String>,
    pub alias: String,
    pub score: f64,
    /// `template.confidence * score / 100`, within [0, 1].
    pub confidence: f64,
}

/// Matches prepared-meal names against dish template aliases.
pub struct DishTemplateMatcher {
    inner: LocalCatalogMatcher,
    templates: HashMap<String, DishTemplate>,
}

impl DishTemplateMatcher {
    pub fn new(templates: Vec<DishTemplate>, config: &MatchConfig) -> Self {
        let records: Vec<ReferenceRecord> =
            templates.iter().flat_map(DishTemplate::to_records).collect();
        let settings = IndexSettings::from_config(config).allow([Category::Dish]);
        let (index, stats) = TokenIndex::build(records, settings);
        debug!(
            "Dish template index: {} aliases from {} templates",
            stats.records_indexed,
            templates.len()
        );

        let inner = LocalCatalogMatcher::new(Arc::new(index), config)
            .with_id(DISH_TEMPLATE_MATCHER_ID)
            .with_source(CandidateSource::Scan)
            .with_overrides(OverrideMap::new())
            .with_policy(AcceptancePolicy::MinScore(config.template_match_threshold));

        let mut by_id = HashMap::new();
        for template in templates {
            by_id
                .entry(template.canonical_food_id.clone())
                .or_insert(template);
        }
        Self {
            inner,
            templates: by_id,
        }
    }

    pub fn template(&self, canonical_food_id: &str) -> Option<&DishTemplate> {
        self.templates.get(canonical_food_id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn resolve_now(&self, query: &MatchQuery) -> MatchResult {
        self.inner.resolve_now(query)
    }

    /// Converts an accepted result into a mapping. `None` when unmatched.
    pub fn mapping(&self, result: &MatchResult) -> Option<DishMapping> {
        let id = result.matched_record_id.as_ref()?;
        let template = self.template(id.as_str())?;
        let confidence = (template.confidence * result.score / 100.0).clamp(0.0, 1.0);
        Some(DishMapping {
            canonical_food_id: template.canonical_food_id.clone(),
            ingredient_profile_id: template.default_ingredient_profile_id.clone(),
            alias: result.matched_text.clone().unwrap_or_default(),
            score: result.score,
            confidence,
        })
    }

    pub fn map_item(&self, raw: &str) -> Option<DishMapping> {
        self.mapping(&self.resolve_now(&MatchQuery::new(raw)))
    }
}

#[async_trait]
impl Matcher for DishTemplateMatcher {
    fn id(&self) -> &'static str {
        DISH_TEMPLATE_MATCHER_ID
    }

    async fn resolve(&self, query: &MatchQuery) -> MatchResult {
        self.resolve_now(query)
    }
}

/// Keyword dictionary for raw groceries: the longest key contained in the
/// item name wins.
#[derive(Debug, Clone, Default)]
pub struct GroceryRawMap {
    /// Sorted by key so equal-length ties resolve the same way every run.
    entries: Vec<ReferenceRecord>,
}

impl GroceryRawMap {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut keyed: HashMap<String, String> = HashMap::new();
        for (key, value) in pairs {
            let key = normalize(key.as_ref());
            let value = value.as_ref().trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            keyed.insert(key, value.to_string());
        }
        let mut entries: Vec<ReferenceRecord> = keyed
            .into_iter()
            .map(|(key, id)| ReferenceRecord::new(RecordId(id), Category::Dish, key))
            .collect();
        entries.sort_by(|a, b| a.normalized_text().cmp(b.normalized_text()));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, raw: &str) -> Option<&ReferenceRecord> {
        let item = normalize(raw);
        if item.is_empty() {
            return None;
        }
        let mut best: Option<&ReferenceRecord> = None;
        for entry in &self.entries {
            if !item.contains(entry.normalized_text()) {
                continue;
            }
            let longer = best
                .map(|b| entry.normalized_text().len() > b.normalized_text().len())
                .unwrap_or(true);
            if longer {
                best = Some(entry);
            }
        }
        best
    }

    /// `dictionary` result at score 100, or unmatched.
    pub fn resolve_now(&self, query: &MatchQuery) -> MatchResult {
        match self.lookup(&query.raw_text) {
            Some(entry) => MatchResult::matched(
                query.clone(),
                entry,
                100.0,
                MatchMethod::Dictionary,
                1,
            ),
            None => MatchResult::unmatched(query.clone(), 0.0, 0),
        }
    }

    /// Ingredient profile derived from a dictionary hit.
    pub fn profile_id(canonical_food_id: &str) -> String {
        format!("{}.base", canonical_food_id)
    }
}
