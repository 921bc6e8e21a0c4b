// src/matching/region.rs

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::MatchConfig;
use crate::matching::index::{IndexSettings, TokenIndex};
use crate::matching::local::{CandidateSource, LocalCatalogMatcher};
use crate::matching::policy::{AcceptancePolicy, OverrideMap};
use crate::matching::Matcher;
use crate::models::{Category, MatchQuery, MatchResult, RecordId, ReferenceRecord, TextForm};

pub const REGION_MATCHER_ID: &str = "region";

/// A scored region offered for manual review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSuggestion {
    pub region: RecordId,
    pub name: String,
    pub score: f64,
}

/// Maps free-text city or metro names onto a fixed list of regions.
///
/// Names are compared in compact form (stop words dropped, tokens joined),
/// every region is a candidate, and the threshold ladder decides acceptance.
pub struct RegionMatcher {
    inner: LocalCatalogMatcher,
}

impl RegionMatcher {
    pub fn new(regions: Vec<ReferenceRecord>, config: &MatchConfig) -> Self {
        let settings = IndexSettings::from_config(config)
            .allow([Category::Region])
            .with_form(TextForm::Compact);
        let (index, _) = TokenIndex::build(regions, settings);
        let overrides = OverrideMap::region_defaults().merge(&config.override_map);

        let inner = LocalCatalogMatcher::new(Arc::new(index), config)
            .with_id(REGION_MATCHER_ID)
            .with_source(CandidateSource::Scan)
            .with_policy(AcceptancePolicy::ladder(config.thresholds.iter().copied()))
            .with_overrides(overrides);
        Self { inner }
    }

    /// Region records from plain names. The name doubles as the id.
    pub fn records_from_names<I, S>(names: I) -> Vec<ReferenceRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref().trim();
                ReferenceRecord::with_form(
                    RecordId::from(name),
                    Category::Region,
                    name,
                    TextForm::Compact,
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index().is_empty()
    }

    pub fn resolve_now(&self, query: &MatchQuery) -> MatchResult {
        self.inner.resolve_now(query)
    }

    /// Top `limit` regions by score, with no acceptance applied.
    pub fn suggest(&self, raw: &str, limit: usize) -> Vec<RegionSuggestion> {
        let normalized = self.inner.normalize(raw);
        if normalized.is_empty() || limit == 0 {
            return Vec::new();
        }
        let query = MatchQuery::new(raw);
        let candidates = self.inner.candidates(&normalized, &query);
        let index = self.inner.index();
        self.inner
            .scorer()
            .rank(
                &normalized,
                None,
                candidates
                    .positions
                    .iter()
                    .filter_map(|&p| index.record(p).map(|r| (p, r))),
                limit,
            )
            .into_iter()
            .filter_map(|scored| {
                index.record(scored.position).map(|r| RegionSuggestion {
                    region: r.id().clone(),
                    name: r.canonical_text().to_string(),
                    score: scored.score,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Matcher for RegionMatcher {
    fn id(&self) -> &'static str {
        REGION_MATCHER_ID
    }

    async fn resolve(&self, query: &MatchQuery) -> MatchResult {
        self.resolve_now(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchMethod;

    fn regions() -> RegionMatcher {
        RegionMatcher::new(
            RegionMatcher::records_from_names([
                "NewYork",
                "WashingtonDC",
                "SanFrancisco",
                "LosAngeles",
                "Berlin",
            ]),
            &MatchConfig::default(),
        )
    }

    #[test]
    fn test_default_override() {
        let result = regions().resolve_now(&MatchQuery::new("Washington D.C."));
        assert_eq!(result.method, MatchMethod::Override);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.candidate_count, 0);
        assert_eq!(result.matched_record_id, Some(RecordId::from("WashingtonDC")));
    }

    #[test]
    fn test_compact_exact_match() {
        let result = regions().resolve_now(&MatchQuery::new("San Francisco Metro Area"));
        assert_eq!(result.method, MatchMethod::ExactNormalized);
        assert_eq!(result.matched_record_id, Some(RecordId::from("SanFrancisco")));
    }

    #[test]
    fn test_fuzzy_tier() {
        let result = regions().resolve_now(&MatchQuery::new("Los Angelas"));
        assert!(matches!(result.method, MatchMethod::FuzzyTier(_)));
        assert_eq!(result.matched_record_id, Some(RecordId::from("LosAngeles")));
        assert_eq!(result.candidate_count, 5);
        if let MatchMethod::FuzzyTier(rung) = result.method {
            assert!(result.score >= rung);
        }
    }

    #[test]
    fn test_unmatched_below_last_rung() {
        let result = regions().resolve_now(&MatchQuery::new("Tokyo"));
        assert_eq!(result.method, MatchMethod::None);
        assert!(result.score < 75.0);
    }

    #[test]
    fn test_suggestions_ranked() {
        let suggestions = regions().suggest("Los Angelas", 2);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].region, RecordId::from("LosAngeles"));
        assert!(suggestions[0].score >= suggestions[1].score);
        assert!(regions().suggest("...", 3).is_empty());
    }
}
