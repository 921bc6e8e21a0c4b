// src/matching/local.rs

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, trace};

use crate::config::MatchConfig;
use crate::matching::candidates::{scan_candidates, select_candidates, CandidateSet};
use crate::matching::index::TokenIndex;
use crate::matching::normalize::tokenize;
use crate::matching::policy::{AcceptancePolicy, OverrideMap};
use crate::matching::scorer::Scorer;
use crate::matching::Matcher;
use crate::models::{MatchMethod, MatchQuery, MatchResult, TextForm};

pub const FDC_LOCAL_MATCHER_ID: &str = "fdc_local";

/// Where candidates come from for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// Two-list posting lookup on the query's tokens.
    Postings,
    /// Every record in catalog order. For compact-form catalogs.
    Scan,
}

/// Resolves queries against an in-memory [`TokenIndex`].
///
/// Stages run in a fixed order: override map, exact normalized match,
/// candidate generation, scoring, then the acceptance policy.
pub struct LocalCatalogMatcher {
    id: &'static str,
    index: Arc<TokenIndex>,
    overrides: OverrideMap,
    policy: AcceptancePolicy,
    scorer: Scorer,
    source: CandidateSource,
    max_candidates: usize,
    min_token_length: usize,
}

impl LocalCatalogMatcher {
    /// Single-threshold matcher over a token index, configured from `config`.
    pub fn new(index: Arc<TokenIndex>, config: &MatchConfig) -> Self {
        let source = match index.form() {
            TextForm::Spaced => CandidateSource::Postings,
            TextForm::Compact => CandidateSource::Scan,
        };
        Self {
            id: FDC_LOCAL_MATCHER_ID,
            min_token_length: index.settings().min_token_length,
            index,
            overrides: OverrideMap::from(config.override_map.clone()),
            policy: AcceptancePolicy::MinScore(config.min_score),
            scorer: Scorer::new(config.include_secondary_signal),
            source,
            max_candidates: config.max_candidates,
        }
    }

    pub fn with_id(self, id: &'static str) -> Self {
        Self { id, ..self }
    }

    pub fn with_policy(self, policy: AcceptancePolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn with_overrides(self, overrides: OverrideMap) -> Self {
        Self { overrides, ..self }
    }

    pub fn with_source(self, source: CandidateSource) -> Self {
        Self { source, ..self }
    }

    pub fn index(&self) -> &TokenIndex {
        &self.index
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Normalizes text the way this catalog compares it.
    pub fn normalize(&self, raw: &str) -> String {
        self.index.form().apply(raw)
    }

    /// Candidate positions for already-normalized query text.
    pub fn candidates(&self, normalized: &str, query: &MatchQuery) -> CandidateSet {
        let filter = query.category_filter.as_ref();
        match self.source {
            CandidateSource::Postings => {
                let tokens = tokenize(normalized, self.min_token_length);
                select_candidates(&self.index, &tokens, filter, self.max_candidates)
            }
            CandidateSource::Scan => scan_candidates(&self.index, filter, self.max_candidates),
        }
    }

    /// Synchronous resolution. Pure CPU work over shared read-only data.
    pub fn resolve_now(&self, query: &MatchQuery) -> MatchResult {
        if let Some(target) = self.overrides.get(&query.raw_text) {
            debug!("Override hit for '{}' -> {}", query.raw_text, target);
            return MatchResult::overridden(query.clone(), target.clone());
        }

        let normalized = self.normalize(&query.raw_text);
        if normalized.is_empty() {
            trace!("Query '{}' is empty after normalization", query.raw_text);
            return MatchResult::unmatched(query.clone(), 0.0, 0);
        }

        let filter = query.category_filter.as_ref();
        let exact = self
            .index
            .exact_matches(&normalized)
            .iter()
            .filter_map(|&p| self.index.record(p))
            .find(|r| filter.map(|f| f.allows(r.category())).unwrap_or(true));
        if let Some(record) = exact {
            return MatchResult::matched(
                query.clone(),
                record,
                100.0,
                MatchMethod::ExactNormalized,
                0,
            );
        }

        let candidates = self.candidates(&normalized, query);
        if candidates.is_empty() {
            return MatchResult::unmatched(query.clone(), 0.0, 0);
        }
        if candidates.truncated {
            debug!(
                "Truncated {} candidates to {} for '{}'",
                candidates.raw_count,
                candidates.len(),
                query.raw_text
            );
        }

        let best = self.scorer.best(
            &normalized,
            query.secondary_text.as_deref(),
            candidates
                .positions
                .iter()
                .filter_map(|&p| self.index.record(p).map(|r| (p, r))),
        );
        let count = candidates.len();
        let best = match best {
            Some(best) => best,
            None => return MatchResult::unmatched(query.clone(), 0.0, count),
        };

        match (self.policy.decide(best.score), self.index.record(best.position)) {
            (Some(method), Some(record)) => {
                trace!(
                    "'{}' -> '{}' ({:.2}, {})",
                    query.raw_text,
                    record.canonical_text(),
                    best.score,
                    method
                );
                MatchResult::matched(query.clone(), record, best.score, method, count)
            }
            _ => MatchResult::unmatched(query.clone(), best.score, count),
        }
    }
}

#[async_trait]
impl Matcher for LocalCatalogMatcher {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn resolve(&self, query: &MatchQuery) -> MatchResult {
        self.resolve_now(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::index::IndexSettings;
    use crate::models::{Category, CategoryFilter, RecordId, ReferenceRecord};

    fn matcher(texts: &[(&str, &str, Category)]) -> LocalCatalogMatcher {
        let records = texts
            .iter()
            .map(|(id, text, category)| ReferenceRecord::new(RecordId::from(*id), *category, *text));
        let (index, _) = TokenIndex::build(records, IndexSettings::default());
        LocalCatalogMatcher::new(Arc::new(index), &MatchConfig::default())
    }

    #[test]
    fn test_fuzzy_match_above_min_score() {
        let m = matcher(&[("1", "Caffe Latte", Category::SurveyFndds)]);
        let result = m.resolve_now(&MatchQuery::new("Latte"));
        assert_eq!(result.method, MatchMethod::Fuzzy);
        assert_eq!(result.matched_record_id, Some(RecordId::from("1")));
        assert!(result.score >= 70.0);
        assert_eq!(result.candidate_count, 1);
    }

    #[test]
    fn test_exact_normalized_respects_filter() {
        let m = matcher(&[
            ("b", "Green Tea", Category::Branded),
            ("f", "green tea", Category::Foundation),
        ]);
        let query = MatchQuery::new("GREEN-TEA")
            .with_filter(CategoryFilter::new(vec![Category::Foundation]));
        let result = m.resolve_now(&query);
        assert_eq!(result.method, MatchMethod::ExactNormalized);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.matched_record_id, Some(RecordId::from("f")));
    }

    #[test]
    fn test_override_short_circuits() {
        let m = matcher(&[("1", "Caffe Latte", Category::SurveyFndds)]).with_overrides(
            [("Flat White", "999")].into_iter().collect(),
        );
        let result = m.resolve_now(&MatchQuery::new("Flat White"));
        assert_eq!(result.method, MatchMethod::Override);
        assert_eq!(result.candidate_count, 0);
        assert_eq!(result.matched_record_id, Some(RecordId::from("999")));
    }

    #[test]
    fn test_below_min_score_keeps_best_score() {
        let m = matcher(&[("1", "Latte Macchiato", Category::Branded)]);
        let result = m.resolve_now(&MatchQuery::new("latte zzzzzzzz"));
        assert_eq!(result.method, MatchMethod::None);
        assert_eq!(result.candidate_count, 1);
        assert!(result.score > 0.0 && result.score < 70.0, "score was {}", result.score);
        assert!(result.matched_record_id.is_none());
    }

    #[test]
    fn test_punctuation_only_query_is_unmatched() {
        let m = matcher(&[("1", "Caffe Latte", Category::SurveyFndds)]);
        let result = m.resolve_now(&MatchQuery::new("!!!"));
        assert_eq!(result.method, MatchMethod::None);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.candidate_count, 0);
    }
}
