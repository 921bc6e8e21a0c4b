// src/models.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::matching::normalize::{normalize, normalize_key};

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Newtype pattern so catalog ids are never mixed up with free text

/// Strongly typed identifier for a reference record (FDC id, region slug, canonical food id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId(value.to_string())
    }
}

//------------------------------------------------------------------------------
// CATEGORIES
//------------------------------------------------------------------------------

/// Kind of reference record a catalog holds.
///
/// The first four variants are the FoodData Central data types, which carry a
/// different label in the search API than in the bulk CSV export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Branded,
    Foundation,
    SrLegacy,
    SurveyFndds,
    Region,
    Dish,
}

impl Category {
    /// FDC data types in the order used for the default fallback filter.
    pub const FDC: [Category; 4] = [
        Category::Branded,
        Category::Foundation,
        Category::SurveyFndds,
        Category::SrLegacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branded => "branded",
            Self::Foundation => "foundation",
            Self::SrLegacy => "sr_legacy",
            Self::SurveyFndds => "survey_fndds",
            Self::Region => "region",
            Self::Dish => "dish",
        }
    }

    /// Label used by the FDC search API (`dataType` field).
    pub fn api_label(&self) -> &'static str {
        match self {
            Self::Branded => "Branded",
            Self::Foundation => "Foundation",
            Self::SrLegacy => "SR Legacy",
            Self::SurveyFndds => "FNDDS",
            Self::Region => "Region",
            Self::Dish => "Dish",
        }
    }

    /// Label used in the `data_type` column of the FDC bulk `food.csv` export.
    pub fn local_label(&self) -> &'static str {
        match self {
            Self::Branded => "branded_food",
            Self::Foundation => "foundation_food",
            Self::SrLegacy => "sr_legacy_food",
            Self::SurveyFndds => "survey_fndds_food",
            Self::Region => "region",
            Self::Dish => "dish",
        }
    }

    pub fn from_api_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Branded" => Some(Self::Branded),
            "Foundation" => Some(Self::Foundation),
            "SR Legacy" => Some(Self::SrLegacy),
            "FNDDS" | "Survey (FNDDS)" => Some(Self::SurveyFndds),
            _ => None,
        }
    }

    pub fn from_local_label(label: &str) -> Option<Self> {
        match label.trim() {
            "branded_food" => Some(Self::Branded),
            "foundation_food" => Some(Self::Foundation),
            "sr_legacy_food" => Some(Self::SrLegacy),
            "survey_fndds_food" => Some(Self::SurveyFndds),
            _ => None,
        }
    }

    /// Accepts either label family, or the snake_case name.
    pub fn parse(label: &str) -> Option<Self> {
        Self::from_api_label(label)
            .or_else(|| Self::from_local_label(label))
            .or_else(|| match label.trim().to_lowercase().as_str() {
                "branded" => Some(Self::Branded),
                "foundation" => Some(Self::Foundation),
                "sr_legacy" => Some(Self::SrLegacy),
                "survey_fndds" | "fndds" => Some(Self::SurveyFndds),
                "region" => Some(Self::Region),
                "dish" => Some(Self::Dish),
                _ => None,
            })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Food subtype assigned upstream by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodKind {
    PreparedMeal,
    GroceryPackaged,
    GroceryRaw,
    Beverage,
}

impl FoodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreparedMeal => "prepared_meal",
            Self::GroceryPackaged => "grocery_packaged",
            Self::GroceryRaw => "grocery_raw",
            Self::Beverage => "beverage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "prepared_meal" => Some(Self::PreparedMeal),
            "grocery_packaged" => Some(Self::GroceryPackaged),
            "grocery_raw" => Some(Self::GroceryRaw),
            "beverage" => Some(Self::Beverage),
            _ => None,
        }
    }

    /// Which FDC data types are searched for items of this kind.
    pub fn default_categories(&self) -> Vec<Category> {
        match self {
            Self::PreparedMeal | Self::Beverage => vec![
                Category::SurveyFndds,
                Category::SrLegacy,
                Category::Foundation,
            ],
            Self::GroceryPackaged => vec![Category::Branded],
            Self::GroceryRaw => vec![Category::Foundation, Category::SrLegacy],
        }
    }
}

impl fmt::Display for FoodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, de-duplicated set of allowed categories.
///
/// Order is preserved because it is part of the remote cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFilter(Vec<Category>);

impl CategoryFilter {
    pub fn new<I: IntoIterator<Item = Category>>(categories: I) -> Self {
        let mut ordered: Vec<Category> = Vec::new();
        for category in categories {
            if !ordered.contains(&category) {
                ordered.push(category);
            }
        }
        CategoryFilter(ordered)
    }

    /// Filter for a food kind, falling back to `fallback` when the kind is unknown.
    pub fn for_food_kind(kind: Option<FoodKind>, fallback: &[Category]) -> Self {
        match kind {
            Some(kind) => Self::new(kind.default_categories()),
            None => Self::new(fallback.iter().copied()),
        }
    }

    pub fn allows(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    pub fn categories(&self) -> &[Category] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined API labels, e.g. `FNDDS,SR Legacy,Foundation`.
    pub fn api_labels(&self) -> String {
        self.0
            .iter()
            .map(|c| c.api_label())
            .collect::<Vec<_>>()
            .join(",")
    }
}

//------------------------------------------------------------------------------
// CORE DOMAIN MODELS
//------------------------------------------------------------------------------

/// Which normalization a catalog compares in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextForm {
    /// Lowercase tokens separated by single spaces.
    Spaced,
    /// Stop words removed and tokens concatenated; used for place names.
    Compact,
}

impl TextForm {
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Spaced => normalize(text),
            Self::Compact => normalize_key(text),
        }
    }
}

/// One canonical entry of a reference catalog.
///
/// Fields are private so `normalized_text` always stays derived from
/// `canonical_text`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceRecord {
    id: RecordId,
    category: Category,
    canonical_text: String,
    normalized_text: String,
    /// Auxiliary attribute compared against the query's secondary signal (brand owner).
    secondary_text: Option<String>,
}

impl ReferenceRecord {
    pub fn new(id: RecordId, category: Category, canonical_text: impl Into<String>) -> Self {
        Self::with_form(id, category, canonical_text, TextForm::Spaced)
    }

    pub fn with_form(
        id: RecordId,
        category: Category,
        canonical_text: impl Into<String>,
        form: TextForm,
    ) -> Self {
        let canonical_text = canonical_text.into();
        let normalized_text = form.apply(&canonical_text);
        Self {
            id,
            category,
            canonical_text,
            normalized_text,
            secondary_text: None,
        }
    }

    /// Returns a copy carrying a secondary attribute. Empty strings count as absent.
    pub fn with_secondary(self, secondary: Option<String>) -> Self {
        Self {
            secondary_text: secondary.filter(|s| !s.trim().is_empty()),
            ..self
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    pub fn secondary_text(&self) -> Option<&str> {
        self.secondary_text.as_deref()
    }
}

/// A label to resolve against a catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchQuery {
    pub raw_text: String,
    pub category_filter: Option<CategoryFilter>,
    /// Merchant or brand string blended into the score when enabled.
    pub secondary_text: Option<String>,
    /// Kept for per-kind reporting.
    pub food_kind: Option<FoodKind>,
}

impl MatchQuery {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            category_filter: None,
            secondary_text: None,
            food_kind: None,
        }
    }

    pub fn with_filter(self, filter: CategoryFilter) -> Self {
        Self {
            category_filter: Some(filter),
            ..self
        }
    }

    pub fn with_secondary(self, secondary: impl Into<String>) -> Self {
        let secondary = secondary.into();
        Self {
            secondary_text: if secondary.trim().is_empty() {
                None
            } else {
                Some(secondary)
            },
            ..self
        }
    }

    pub fn with_food_kind(self, kind: Option<FoodKind>) -> Self {
        Self {
            food_kind: kind,
            ..self
        }
    }
}

/// How a result's score was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchMethod {
    /// Raw query found in the override map.
    Override,
    /// Normalized query equals a record's normalized text.
    ExactNormalized,
    /// Longest dictionary key contained in the query.
    Dictionary,
    /// Best fuzzy candidate cleared the single `min_score` threshold.
    Fuzzy,
    /// Best fuzzy candidate cleared the given rung of a threshold ladder.
    FuzzyTier(f64),
    /// Nothing accepted.
    None,
}

impl MatchMethod {
    pub fn label(&self) -> String {
        match self {
            Self::Override => "override".to_string(),
            Self::ExactNormalized => "exact_normalized".to_string(),
            Self::Dictionary => "dictionary".to_string(),
            Self::Fuzzy => "fuzzy".to_string(),
            Self::FuzzyTier(threshold) => format!("fuzzy_tier_{}", threshold),
            Self::None => "none".to_string(),
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for MatchMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for MatchMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "override" => Ok(Self::Override),
            "exact_normalized" => Ok(Self::ExactNormalized),
            "dictionary" => Ok(Self::Dictionary),
            "fuzzy" => Ok(Self::Fuzzy),
            "none" => Ok(Self::None),
            other => other
                .strip_prefix("fuzzy_tier_")
                .and_then(|t| t.parse::<f64>().ok())
                .map(Self::FuzzyTier)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown match method '{}'", other))),
        }
    }
}

/// Outcome of resolving one query. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub query: MatchQuery,
    pub matched_record_id: Option<RecordId>,
    pub matched_text: Option<String>,
    pub matched_category: Option<Category>,
    /// Secondary text (brand) of the matched record.
    pub matched_secondary: Option<String>,
    /// Always within [0, 100].
    pub score: f64,
    pub method: MatchMethod,
    /// Size of the candidate set actually scored.
    pub candidate_count: usize,
    /// Remote fetch failure recorded for the caller, if any.
    pub fetch_error: Option<String>,
}

impl MatchResult {
    pub fn matched(
        query: MatchQuery,
        record: &ReferenceRecord,
        score: f64,
        method: MatchMethod,
        candidate_count: usize,
    ) -> Self {
        Self {
            query,
            matched_record_id: Some(record.id().clone()),
            matched_text: Some(record.canonical_text().to_string()),
            matched_category: Some(record.category()),
            matched_secondary: record.secondary_text().map(str::to_string),
            score: clamp_score(score),
            method,
            candidate_count,
            fetch_error: None,
        }
    }

    pub fn overridden(query: MatchQuery, target: RecordId) -> Self {
        Self {
            query,
            matched_text: Some(target.0.clone()),
            matched_record_id: Some(target),
            matched_category: None,
            matched_secondary: None,
            score: 100.0,
            method: MatchMethod::Override,
            candidate_count: 0,
            fetch_error: None,
        }
    }

    /// `score` is the best score seen, kept for diagnostics even though it was rejected.
    pub fn unmatched(query: MatchQuery, score: f64, candidate_count: usize) -> Self {
        Self {
            query,
            matched_record_id: None,
            matched_text: None,
            matched_category: None,
            matched_secondary: None,
            score: clamp_score(score),
            method: MatchMethod::None,
            candidate_count,
            fetch_error: None,
        }
    }

    pub fn with_fetch_error(self, error: Option<String>) -> Self {
        Self {
            fetch_error: error,
            ..self
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched_record_id.is_some()
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// One line of the append-only result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    #[serde(rename = "foods", alias = "payload")]
    pub payload: T,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

/// A food record as returned by the FDC search API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFood {
    pub fdc_id: Option<i64>,
    pub description: Option<String>,
    pub data_type: Option<String>,
    pub brand_owner: Option<String>,
    pub brand_name: Option<String>,
}

impl RemoteFood {
    /// Converts to a reference record. Foods without an id or description are dropped.
    pub fn to_reference_record(&self) -> Option<ReferenceRecord> {
        let id = self.fdc_id?;
        let description = self.description.as_deref().filter(|d| !d.trim().is_empty())?;
        // Unlabelled foods are still scored; they are filed under FNDDS.
        let category = self
            .data_type
            .as_deref()
            .and_then(Category::parse)
            .unwrap_or(Category::SurveyFndds);
        let brand = self
            .brand_owner
            .clone()
            .filter(|b| !b.trim().is_empty())
            .or_else(|| self.brand_name.clone());
        Some(ReferenceRecord::new(RecordId(id.to_string()), category, description).with_secondary(brand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_labels_round_trip_through_parse() {
        for category in Category::FDC {
            assert_eq!(Category::from_api_label(category.api_label()), Some(category));
            assert_eq!(Category::from_local_label(category.local_label()), Some(category));
        }
        assert_eq!(Category::parse("branded_food"), Some(Category::Branded));
        assert_eq!(Category::parse("nonsense"), None);
    }

    #[test]
    fn test_filter_preserves_order_and_dedupes() {
        let filter = CategoryFilter::new(vec![
            Category::SurveyFndds,
            Category::Foundation,
            Category::SurveyFndds,
        ]);
        assert_eq!(filter.categories(), &[Category::SurveyFndds, Category::Foundation]);
        assert_eq!(filter.api_labels(), "FNDDS,Foundation");
        assert!(!filter.allows(Category::Branded));
    }

    #[test]
    fn test_food_kind_routing() {
        let filter = CategoryFilter::for_food_kind(Some(FoodKind::GroceryPackaged), &Category::FDC);
        assert_eq!(filter.categories(), &[Category::Branded]);
        let fallback = CategoryFilter::for_food_kind(None, &Category::FDC);
        assert_eq!(fallback.categories().len(), 4);
    }

    #[test]
    fn test_match_method_labels() {
        assert_eq!(MatchMethod::FuzzyTier(85.0).label(), "fuzzy_tier_85");
        assert_eq!(MatchMethod::ExactNormalized.to_string(), "exact_normalized");
        let json = serde_json::to_string(&MatchMethod::FuzzyTier(90.0)).unwrap();
        let back: MatchMethod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MatchMethod::FuzzyTier(90.0));
    }

    #[test]
    fn test_remote_food_conversion_prefers_brand_owner() {
        let food = RemoteFood {
            fdc_id: Some(42),
            description: Some("Caffe Latte".to_string()),
            data_type: Some("Branded".to_string()),
            brand_owner: Some("".to_string()),
            brand_name: Some("Starbucks".to_string()),
        };
        let record = food.to_reference_record().unwrap();
        assert_eq!(record.id().as_str(), "42");
        assert_eq!(record.category(), Category::Branded);
        assert_eq!(record.normalized_text(), "caffe latte");
        assert_eq!(record.secondary_text(), Some("Starbucks"));

        let missing = RemoteFood { description: None, ..food };
        assert!(missing.to_reference_record().is_none());
    }

    #[test]
    fn test_scores_are_clamped() {
        let result = MatchResult::unmatched(MatchQuery::new("x"), 140.0, 0);
        assert_eq!(result.score, 100.0);
        assert!(!result.is_matched());
    }
}
