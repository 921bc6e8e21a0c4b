// src/matching/candidates.rs

use std::collections::HashSet;

use log::trace;

use crate::matching::index::TokenIndex;
use crate::models::CategoryFilter;

/// Record positions selected for scoring, in a stable order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    pub positions: Vec<usize>,
    /// Size before the `max_candidates` cut (after the category filter).
    pub raw_count: usize,
    pub truncated: bool,
}

impl CandidateSet {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Two-list candidate generation.
///
/// Query tokens that hit the index are ordered by posting-list length
/// (shortest first, ties kept in query order). The set is seeded with the
/// rarest token's records and the second-rarest list is unioned in. No other
/// list is consulted. The category filter is applied next, then the set is
/// cut to the first `max_candidates` positions.
pub fn select_candidates(
    index: &TokenIndex,
    query_tokens: &[String],
    filter: Option<&CategoryFilter>,
    max_candidates: usize,
) -> CandidateSet {
    let mut seen_tokens: HashSet<&str> = HashSet::new();
    let mut resolved: Vec<(&str, &[usize])> = query_tokens
        .iter()
        .filter(|t| seen_tokens.insert(t.as_str()))
        .filter_map(|t| index.postings(t).map(|list| (t.as_str(), list)))
        .collect();

    if resolved.is_empty() {
        trace!("No query token found in index: {:?}", query_tokens);
        return CandidateSet::default();
    }

    // sort_by_key is stable, so equal lengths keep query order
    resolved.sort_by_key(|(_, list)| list.len());

    let mut members: HashSet<usize> = HashSet::new();
    let mut ordered: Vec<usize> = Vec::new();
    for (_, list) in resolved.iter().take(2) {
        for &position in list.iter() {
            if members.insert(position) {
                ordered.push(position);
            }
        }
    }

    let positions: Vec<usize> = match filter {
        Some(filter) => ordered
            .into_iter()
            .filter(|&p| {
                index
                    .record(p)
                    .map(|r| filter.allows(r.category()))
                    .unwrap_or(false)
            })
            .collect(),
        None => ordered,
    };

    trace!(
        "Seeded from '{}' ({} postings), {} candidates after filter",
        resolved[0].0,
        resolved[0].1.len(),
        positions.len()
    );

    truncate(positions, max_candidates)
}

/// Every record in catalog order, optionally filtered, cut at `max_candidates`.
///
/// Used for small catalogs compared in compact form, where tokens are
/// concatenated and the inverted index would only ever find exact keys.
pub fn scan_candidates(
    index: &TokenIndex,
    filter: Option<&CategoryFilter>,
    max_candidates: usize,
) -> CandidateSet {
    let positions: Vec<usize> = index
        .records()
        .iter()
        .enumerate()
        .filter(|(_, r)| filter.map(|f| f.allows(r.category())).unwrap_or(true))
        .map(|(p, _)| p)
        .collect();
    truncate(positions, max_candidates)
}

fn truncate(mut positions: Vec<usize>, max_candidates: usize) -> CandidateSet {
    let raw_count = positions.len();
    let truncated = raw_count > max_candidates;
    if truncated {
        positions.truncate(max_candidates);
    }
    CandidateSet {
        positions,
        raw_count,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::index::IndexSettings;
    use crate::matching::normalize::{normalize, tokenize};
    use crate::models::{Category, RecordId, ReferenceRecord};

    fn build(texts: &[(&str, Category)]) -> TokenIndex {
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, (text, category))| {
                ReferenceRecord::new(RecordId(i.to_string()), *category, *text)
            })
            .collect::<Vec<_>>();
        TokenIndex::build(records, IndexSettings::default()).0
    }

    fn tokens(text: &str) -> Vec<String> {
        tokenize(&normalize(text), 3)
    }

    #[test]
    fn test_unknown_tokens_give_empty_set() {
        let index = build(&[("Caffe Latte", Category::SurveyFndds)]);
        let set = select_candidates(&index, &tokens("Delivery Fee"), None, 3000);
        assert!(set.is_empty());
        assert_eq!(set.raw_count, 0);
        assert!(!set.truncated);
    }

    #[test]
    fn test_only_two_rarest_lists_are_unioned() {
        let index = build(&[
            ("chicken soup", Category::SurveyFndds),    // 0
            ("chicken curry", Category::SurveyFndds),   // 1
            ("chicken noodle", Category::SurveyFndds),  // 2
            ("noodle bowl", Category::SurveyFndds),     // 3
            ("spicy curry", Category::SurveyFndds),     // 4
            ("curry noodle", Category::SurveyFndds),    // 5
        ]);
        // chicken: [0,1,2]  curry: [1,4,5]  noodle: [2,3,5]  spicy: [4]
        let set = select_candidates(&index, &tokens("spicy chicken curry noodle"), None, 3000);
        // spicy is rarest, then chicken (first of the three-length lists in query order)
        assert_eq!(set.positions, vec![4, 0, 1, 2]);
    }

    #[test]
    fn test_duplicate_query_tokens_count_once() {
        let index = build(&[
            ("latte", Category::Branded),
            ("mocha latte", Category::Branded),
            ("mocha", Category::Branded),
        ]);
        let set = select_candidates(&index, &tokens("latte latte mocha"), None, 3000);
        assert_eq!(set.positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_category_filter_applies_before_truncation() {
        let index = build(&[
            ("green tea", Category::Branded),
            ("green tea leaves", Category::Foundation),
            ("green tea latte", Category::SurveyFndds),
        ]);
        let filter = CategoryFilter::new(vec![Category::Foundation, Category::SurveyFndds]);
        let set = select_candidates(&index, &tokens("green tea"), Some(&filter), 1);
        assert_eq!(set.positions, vec![1]);
        assert_eq!(set.raw_count, 2);
        assert!(set.truncated);
    }

    #[test]
    fn test_truncation_is_stable() {
        let texts: Vec<(String, Category)> = (0..50)
            .map(|i| (format!("rice bowl {}", i), Category::SurveyFndds))
            .collect();
        let borrowed: Vec<(&str, Category)> =
            texts.iter().map(|(t, c)| (t.as_str(), *c)).collect();
        let index = build(&borrowed);
        let first = select_candidates(&index, &tokens("rice"), None, 20);
        let second = select_candidates(&index, &tokens("rice"), None, 20);
        assert_eq!(first, second);
        assert_eq!(first.positions, (0..20).collect::<Vec<_>>());
        assert_eq!(first.raw_count, 50);
    }

    #[test]
    fn test_scan_returns_catalog_order() {
        let index = build(&[
            ("Berlin", Category::Region),
            ("Bremen", Category::Region),
            ("Hamburg", Category::Region),
        ]);
        let set = scan_candidates(&index, None, 2);
        assert_eq!(set.positions, vec![0, 1]);
        assert!(set.truncated);
    }
}
