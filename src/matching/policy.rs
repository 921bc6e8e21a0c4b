// src/matching/policy.rs

use std::collections::HashMap;

use crate::models::{MatchMethod, RecordId};

/// Descending list of acceptance thresholds, strictest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdLadder(Vec<f64>);

impl ThresholdLadder {
    /// Sorts descending and drops NaN and duplicate rungs, so callers may pass
    /// thresholds in any order.
    pub fn new<I: IntoIterator<Item = f64>>(thresholds: I) -> Self {
        let mut rungs: Vec<f64> = thresholds.into_iter().filter(|t| !t.is_nan()).collect();
        rungs.sort_by(|a, b| b.total_cmp(a));
        rungs.dedup();
        ThresholdLadder(rungs)
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.0
    }

    /// First (strictest) rung the score clears.
    pub fn first_cleared(&self, score: f64) -> Option<f64> {
        self.0.iter().copied().find(|threshold| score >= *threshold)
    }
}

/// How a best fuzzy score is turned into accept / reject.
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptancePolicy {
    /// Accept iff `score >= min_score`. Reported as `fuzzy`.
    MinScore(f64),
    /// Accept at the first rung cleared. Reported as `fuzzy_tier_<rung>`.
    Ladder(ThresholdLadder),
}

impl AcceptancePolicy {
    pub fn ladder<I: IntoIterator<Item = f64>>(thresholds: I) -> Self {
        AcceptancePolicy::Ladder(ThresholdLadder::new(thresholds))
    }

    /// `None` means the best candidate is rejected.
    pub fn decide(&self, score: f64) -> Option<MatchMethod> {
        match self {
            AcceptancePolicy::MinScore(min_score) => {
                (score >= *min_score).then_some(MatchMethod::Fuzzy)
            }
            AcceptancePolicy::Ladder(ladder) => ladder.first_cleared(score).map(MatchMethod::FuzzyTier),
        }
    }
}

/// Exact raw-text to id table consulted before any normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideMap(HashMap<String, RecordId>);

impl OverrideMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known spellings of metro areas that fuzzy matching gets wrong.
    pub fn region_defaults() -> Self {
        [
            ("Washington D.C.", "WashingtonDC"),
            ("New York City", "NewYork"),
            ("Upstate NY", "NewYork"),
        ]
        .into_iter()
        .collect()
    }

    pub fn insert(&mut self, raw: impl Into<String>, id: RecordId) {
        self.0.insert(raw.into(), id);
    }

    /// Entries in `other` win over existing ones.
    pub fn merge(mut self, other: &HashMap<String, RecordId>) -> Self {
        for (raw, id) in other {
            self.0.insert(raw.clone(), id.clone());
        }
        self
    }

    /// Exact lookup. Case and whitespace are significant.
    pub fn get(&self, raw: &str) -> Option<&RecordId> {
        self.0.get(raw)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, RecordId>> for OverrideMap {
    fn from(map: HashMap<String, RecordId>) -> Self {
        OverrideMap(map)
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for OverrideMap {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        OverrideMap(
            iter.into_iter()
                .map(|(raw, id)| (raw.to_string(), RecordId::from(id)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_sorts_descending() {
        let ladder = ThresholdLadder::new(vec![75.0, 90.0, f64::NAN, 85.0, 80.0, 90.0]);
        assert_eq!(ladder.thresholds(), &[90.0, 85.0, 80.0, 75.0]);
    }

    #[test]
    fn test_ladder_accepts_at_strictest_cleared_rung() {
        let policy = AcceptancePolicy::ladder(vec![90.0, 85.0, 80.0, 75.0]);
        assert_eq!(policy.decide(95.0), Some(MatchMethod::FuzzyTier(90.0)));
        assert_eq!(policy.decide(90.0), Some(MatchMethod::FuzzyTier(90.0)));
        assert_eq!(policy.decide(87.5), Some(MatchMethod::FuzzyTier(85.0)));
        assert_eq!(policy.decide(75.0), Some(MatchMethod::FuzzyTier(75.0)));
        assert_eq!(policy.decide(74.9), None);
    }

    #[test]
    fn test_ladder_never_skips_a_stricter_rung() {
        let ladder = ThresholdLadder::new(vec![75.0, 80.0, 85.0, 90.0]);
        for tenth in 0..=1000 {
            let score = tenth as f64 / 10.0;
            if let Some(rung) = ladder.first_cleared(score) {
                assert!(score >= rung);
                assert!(ladder.thresholds().iter().all(|t| *t <= rung || score < *t));
            }
        }
    }

    #[test]
    fn test_min_score_is_inclusive() {
        let policy = AcceptancePolicy::MinScore(70.0);
        assert_eq!(policy.decide(70.0), Some(MatchMethod::Fuzzy));
        assert_eq!(policy.decide(69.99), None);
    }

    #[test]
    fn test_override_lookup_is_exact() {
        let overrides = OverrideMap::region_defaults();
        assert_eq!(
            overrides.get("Washington D.C."),
            Some(&RecordId::from("WashingtonDC"))
        );
        assert!(overrides.get("washington d.c.").is_none());

        let mut extra = HashMap::new();
        extra.insert("NYC".to_string(), RecordId::from("NewYork"));
        let merged = overrides.merge(&extra);
        assert_eq!(merged.len(), 4);
    }
}
