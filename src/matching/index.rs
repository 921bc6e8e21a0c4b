// src/matching/index.rs

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Serialize;

use crate::config;
use crate::matching::normalize::tokenize;
use crate::models::{Category, ReferenceRecord, TextForm};

/// Parameters fixed at index build time.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Only the first `token_limit` tokens of each record are indexed.
    pub token_limit: usize,
    pub min_token_length: usize,
    /// Records outside this set are excluded. `None` admits every category.
    pub allowed_categories: Option<HashSet<Category>>,
    pub form: TextForm,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            token_limit: config::DEFAULT_TOKEN_LIMIT_PER_RECORD,
            min_token_length: config::DEFAULT_MIN_TOKEN_LENGTH,
            allowed_categories: None,
            form: TextForm::Spaced,
        }
    }
}

impl IndexSettings {
    pub fn from_config(cfg: &config::MatchConfig) -> Self {
        Self {
            token_limit: cfg.token_limit_per_record,
            min_token_length: cfg.min_token_length,
            ..Self::default()
        }
    }

    pub fn allow<I: IntoIterator<Item = Category>>(self, categories: I) -> Self {
        Self {
            allowed_categories: Some(categories.into_iter().collect()),
            ..self
        }
    }

    pub fn with_form(self, form: TextForm) -> Self {
        Self { form, ..self }
    }
}

/// Counters reported after a build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildStats {
    pub records_seen: usize,
    pub records_indexed: usize,
    pub skipped_empty: usize,
    pub skipped_category: usize,
    pub distinct_terms: usize,
    pub postings: usize,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((d.as_secs_f64() * 100.0).round() / 100.0)
}

/// Inverted index over a reference catalog. Immutable once built, so it can
/// be shared behind an `Arc` by every query worker without locking.
#[derive(Debug)]
pub struct TokenIndex {
    records: Vec<ReferenceRecord>,
    postings: HashMap<String, Vec<usize>>,
    /// normalized text -> record positions carrying it, in catalog order
    exact: HashMap<String, Vec<usize>>,
    settings: IndexSettings,
}

impl TokenIndex {
    /// Single pass over the catalog. The same records in the same order
    /// always produce the same index.
    pub fn build<I>(catalog: I, settings: IndexSettings) -> (Self, BuildStats)
    where
        I: IntoIterator<Item = ReferenceRecord>,
    {
        let start = Instant::now();
        let mut stats = BuildStats::default();
        let mut records: Vec<ReferenceRecord> = Vec::new();
        let mut postings: HashMap<String, Vec<usize>> = HashMap::new();
        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();

        for record in catalog {
            stats.records_seen += 1;

            if record.canonical_text().trim().is_empty() || record.normalized_text().is_empty() {
                stats.skipped_empty += 1;
                continue;
            }
            if let Some(allowed) = &settings.allowed_categories {
                if !allowed.contains(&record.category()) {
                    stats.skipped_category += 1;
                    continue;
                }
            }

            let position = records.len();
            exact
                .entry(record.normalized_text().to_string())
                .or_default()
                .push(position);

            let tokens = tokenize(record.normalized_text(), settings.min_token_length);
            for token in tokens.into_iter().take(settings.token_limit) {
                let list = postings.entry(token).or_default();
                // A token repeated inside the first K only lists the record once
                if list.last() != Some(&position) {
                    list.push(position);
                    stats.postings += 1;
                }
            }
            records.push(record);
        }

        stats.records_indexed = records.len();
        stats.distinct_terms = postings.len();
        stats.elapsed = start.elapsed();

        info!(
            "Indexed {} of {} records with {} distinct terms in {:.2?} ({} empty, {} outside allowed categories)",
            stats.records_indexed,
            stats.records_seen,
            stats.distinct_terms,
            stats.elapsed,
            stats.skipped_empty,
            stats.skipped_category
        );
        debug!("Index holds {} postings in total", stats.postings);

        (
            Self {
                records,
                postings,
                exact,
                settings,
            },
            stats,
        )
    }

    pub fn record(&self, position: usize) -> Option<&ReferenceRecord> {
        self.records.get(position)
    }

    pub fn records(&self) -> &[ReferenceRecord] {
        &self.records
    }

    pub fn postings(&self, term: &str) -> Option<&[usize]> {
        self.postings.get(term).map(Vec::as_slice)
    }

    /// Position of the first record whose normalized text equals `normalized`.
    pub fn exact_match(&self, normalized: &str) -> Option<usize> {
        self.exact_matches(normalized).first().copied()
    }

    /// Every position whose normalized text equals `normalized`, in catalog order.
    pub fn exact_matches(&self, normalized: &str) -> &[usize] {
        self.exact.get(normalized).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn form(&self) -> TextForm {
        self.settings.form
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;

    fn rec(id: &str, category: Category, text: &str) -> ReferenceRecord {
        ReferenceRecord::new(RecordId(id.to_string()), category, text)
    }

    fn catalog() -> Vec<ReferenceRecord> {
        vec![
            rec("1", Category::SurveyFndds, "Coffee, caffe latte, with whole milk"),
            rec("2", Category::Branded, "LATTE MACCHIATO"),
            rec("3", Category::SrLegacy, ""),
            rec("4", Category::Foundation, "Milk, whole, 3.25% milkfat"),
            rec("5", Category::Region, "Berlin"),
        ]
    }

    #[test]
    fn test_only_first_k_tokens_are_indexed() {
        let (index, _) = TokenIndex::build(catalog(), IndexSettings::default());
        assert_eq!(index.postings("coffee"), Some(&[0usize][..]));
        assert_eq!(index.postings("caffe"), Some(&[0usize][..]));
        // "with whole milk" falls beyond the first three tokens of record 1
        assert!(index.postings("with").is_none());
        assert_eq!(index.postings("latte"), Some(&[0usize, 1][..]));
        assert_eq!(index.postings("milk"), Some(&[2usize][..]));
    }

    #[test]
    fn test_excludes_empty_and_disallowed_records() {
        let settings = IndexSettings::default().allow(Category::FDC);
        let (index, stats) = TokenIndex::build(catalog(), settings);
        assert_eq!(stats.records_seen, 5);
        assert_eq!(stats.skipped_empty, 1);
        assert_eq!(stats.skipped_category, 1);
        assert_eq!(index.len(), 3);
        assert!(index.postings("berlin").is_none());
    }

    #[test]
    fn test_build_is_idempotent() {
        let (a, _) = TokenIndex::build(catalog(), IndexSettings::default());
        let (b, _) = TokenIndex::build(catalog(), IndexSettings::default());
        assert_eq!(a.records(), b.records());
        assert_eq!(a.term_count(), b.term_count());
        for record in a.records() {
            for token in tokenize(record.normalized_text(), 3) {
                assert_eq!(a.postings(&token), b.postings(&token));
            }
        }
    }

    #[test]
    fn test_repeated_token_listed_once() {
        let (index, stats) = TokenIndex::build(
            vec![rec("1", Category::Dish, "chicken chicken soup")],
            IndexSettings::default(),
        );
        assert_eq!(index.postings("chicken"), Some(&[0usize][..]));
        assert_eq!(stats.postings, 2);
    }

    #[test]
    fn test_exact_lookup_returns_first_position() {
        let records = vec![
            rec("a", Category::Dish, "Pad Thai"),
            rec("b", Category::Dish, "pad-thai"),
        ];
        let (index, _) = TokenIndex::build(records, IndexSettings::default());
        assert_eq!(index.exact_match("pad thai"), Some(0));
        assert_eq!(index.exact_matches("pad thai"), &[0usize, 1][..]);
        assert_eq!(index.exact_match("pad see ew"), None);
    }

    #[test]
    fn test_short_tokens_not_indexed() {
        let (index, _) = TokenIndex::build(
            vec![rec("1", Category::Dish, "BLT on rye")],
            IndexSettings::default(),
        );
        assert!(index.postings("on").is_none());
        assert!(index.postings("blt").is_some());
        assert!(index.postings("rye").is_some());
    }
}
