// src/matching/scorer.rs

use std::cmp::Ordering;

use log::trace;

use crate::matching::fuzzy::wratio;
use crate::matching::normalize::normalize;
use crate::models::ReferenceRecord;

// Blend weights when a secondary signal (merchant / brand) is compared
pub const PRIMARY_WEIGHT: f64 = 0.8;
pub const SECONDARY_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub position: usize,
    pub score: f64,
}

/// Scores candidates against one query.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    pub include_secondary: bool,
}

impl Scorer {
    pub fn new(include_secondary: bool) -> Self {
        Self { include_secondary }
    }

    /// Primary similarity, blended with the secondary similarity only when
    /// enabled and both secondary texts are non-empty after normalization.
    pub fn score(
        &self,
        query_normalized: &str,
        query_secondary: Option<&str>,
        record: &ReferenceRecord,
    ) -> f64 {
        let primary = wratio(query_normalized, record.normalized_text());
        if !self.include_secondary {
            return primary;
        }

        let query_side = query_secondary.map(normalize).unwrap_or_default();
        let record_side = record.secondary_text().map(normalize).unwrap_or_default();
        if query_side.is_empty() || record_side.is_empty() {
            return primary;
        }

        let secondary = wratio(&query_side, &record_side);
        PRIMARY_WEIGHT * primary + SECONDARY_WEIGHT * secondary
    }

    /// Highest-scoring candidate. A later candidate replaces the current best
    /// only with a strictly greater score, so the first one seen wins ties.
    pub fn best<'a, I>(
        &self,
        query_normalized: &str,
        query_secondary: Option<&str>,
        candidates: I,
    ) -> Option<ScoredCandidate>
    where
        I: IntoIterator<Item = (usize, &'a ReferenceRecord)>,
    {
        let mut best: Option<ScoredCandidate> = None;
        for (position, record) in candidates {
            let score = self.score(query_normalized, query_secondary, record);
            trace!("  {:>6.2} {}", score, record.canonical_text());
            match best {
                Some(current) if score <= current.score => {}
                _ => best = Some(ScoredCandidate { position, score }),
            }
        }
        best
    }

    /// The `limit` best candidates, highest first, ties in candidate order.
    pub fn rank<'a, I>(
        &self,
        query_normalized: &str,
        query_secondary: Option<&str>,
        candidates: I,
        limit: usize,
    ) -> Vec<ScoredCandidate>
    where
        I: IntoIterator<Item = (usize, &'a ReferenceRecord)>,
    {
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|(position, record)| ScoredCandidate {
                position,
                score: self.score(query_normalized, query_secondary, record),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, RecordId};

    fn rec(id: &str, text: &str, brand: Option<&str>) -> ReferenceRecord {
        ReferenceRecord::new(RecordId(id.to_string()), Category::Branded, text)
            .with_secondary(brand.map(str::to_string))
    }

    #[test]
    fn test_blend_requires_both_sides() {
        let record = rec("1", "Caffe Latte", Some("Nestle"));
        let plain = Scorer::new(false).score("latte", Some("Starbucks"), &record);
        let blended = Scorer::new(true).score("latte", Some("Starbucks"), &record);
        let missing_query_side = Scorer::new(true).score("latte", Some("  "), &record);
        assert_ne!(plain, blended);
        assert_eq!(plain, missing_query_side);

        let no_brand = rec("2", "Caffe Latte", None);
        assert_eq!(
            Scorer::new(true).score("latte", Some("Starbucks"), &no_brand),
            Scorer::new(false).score("latte", Some("Starbucks"), &no_brand)
        );
    }

    #[test]
    fn test_blend_weights() {
        let record = rec("1", "caffe latte", Some("peets"));
        let score = Scorer::new(true).score("caffe latte", Some("peets"), &record);
        assert!((score - 100.0).abs() < 1e-9);

        let mismatched = Scorer::new(true).score("caffe latte", Some("zzzzz"), &record);
        assert!((mismatched - 80.0).abs() < 1e-9, "score was {}", mismatched);
    }

    #[test]
    fn test_first_seen_wins_ties() {
        let a = rec("a", "green tea", None);
        let b = rec("b", "green tea", None);
        let best = Scorer::default()
            .best("green tea", None, vec![(0, &a), (1, &b)])
            .unwrap();
        assert_eq!(best.position, 0);
    }

    #[test]
    fn test_best_of_empty_is_none() {
        let none: Vec<(usize, &ReferenceRecord)> = Vec::new();
        assert!(Scorer::default().best("latte", None, none).is_none());
    }

    #[test]
    fn test_rank_orders_descending() {
        let records = [
            rec("0", "black coffee", None),
            rec("1", "caffe latte", None),
            rec("2", "latte", None),
        ];
        let ranked = Scorer::default().rank(
            "latte",
            None,
            records.iter().enumerate(),
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].position, 2);
        assert_eq!(ranked[1].position, 1);
    }
}
