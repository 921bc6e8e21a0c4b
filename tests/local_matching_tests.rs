// tests/local_matching_tests.rs

use std::collections::HashMap;
use std::sync::Arc;

use linkage_lib::config::MatchConfig;
use linkage_lib::matching::candidates::select_candidates;
use linkage_lib::matching::index::{IndexSettings, TokenIndex};
use linkage_lib::matching::normalize::{normalize, tokenize};
use linkage_lib::matching::{LocalCatalogMatcher, Matcher, RegionMatcher};
use linkage_lib::models::{
    Category, CategoryFilter, FoodKind, MatchMethod, MatchQuery, RecordId, ReferenceRecord,
};
use linkage_lib::{run_batch, MatcherRegistry};

fn record(id: &str, category: Category, text: &str) -> ReferenceRecord {
    ReferenceRecord::new(RecordId::from(id), category, text)
}

fn beverage_catalog() -> Vec<ReferenceRecord> {
    vec![
        record("100", Category::SurveyFndds, "Caffe Latte"),
        record("101", Category::SurveyFndds, "Green Tea"),
        record("102", Category::Branded, "Chicken Tikka Masala"),
        record("103", Category::SrLegacy, "Milk, whole, 3.25% milkfat"),
    ]
}

fn local_matcher(records: Vec<ReferenceRecord>, config: &MatchConfig) -> LocalCatalogMatcher {
    let (index, _) = TokenIndex::build(records, IndexSettings::from_config(config));
    LocalCatalogMatcher::new(Arc::new(index), config)
}

#[tokio::test]
async fn test_latte_matches_caffe_latte() {
    let config = MatchConfig::default();
    let matcher = local_matcher(beverage_catalog(), &config);
    let query = MatchQuery::new("Latte")
        .with_food_kind(Some(FoodKind::Beverage))
        .with_filter(CategoryFilter::for_food_kind(Some(FoodKind::Beverage), &Category::FDC));

    let result = matcher.resolve(&query).await;

    assert_eq!(result.method, MatchMethod::Fuzzy);
    assert!(result.score >= 70.0, "score was {}", result.score);
    assert_eq!(result.matched_record_id, Some(RecordId::from("100")));
    assert_eq!(result.matched_text.as_deref(), Some("Caffe Latte"));
    assert_eq!(result.candidate_count, 1);
}

#[tokio::test]
async fn test_delivery_fee_has_no_candidates() {
    let config = MatchConfig::default();
    let matcher = local_matcher(beverage_catalog(), &config);

    let result = matcher.resolve(&MatchQuery::new("Delivery Fee")).await;

    assert_eq!(result.method, MatchMethod::None);
    assert_eq!(result.score, 0.0);
    assert_eq!(result.candidate_count, 0);
    assert!(result.matched_record_id.is_none());
}

#[tokio::test]
async fn test_catalog_texts_match_themselves_exactly() {
    let config = MatchConfig::default();
    let catalog = beverage_catalog();
    let matcher = local_matcher(catalog.clone(), &config);

    for reference in &catalog {
        let result = matcher.resolve(&MatchQuery::new(reference.canonical_text())).await;
        assert_eq!(result.method, MatchMethod::ExactNormalized, "{}", reference.canonical_text());
        assert_eq!(result.score, 100.0);
        assert_eq!(result.matched_record_id.as_ref(), Some(reference.id()));
    }
}

#[tokio::test]
async fn test_override_skips_scoring() {
    let mut overrides = HashMap::new();
    overrides.insert("Washington D.C.".to_string(), RecordId::from("WashingtonDC"));
    let config = MatchConfig {
        override_map: overrides,
        ..MatchConfig::default()
    };
    let matcher = local_matcher(beverage_catalog(), &config);

    let result = matcher.resolve(&MatchQuery::new("Washington D.C.")).await;

    assert_eq!(result.method, MatchMethod::Override);
    assert_eq!(result.score, 100.0);
    assert_eq!(result.candidate_count, 0);
    assert_eq!(result.matched_record_id, Some(RecordId::from("WashingtonDC")));
}

#[test]
fn test_region_defaults_include_washington_override() {
    let regions = RegionMatcher::records_from_names(["WashingtonDC", "NewYork", "Boston"]);
    let matcher = RegionMatcher::new(regions, &MatchConfig::default());

    let result = matcher.resolve_now(&MatchQuery::new("Washington D.C."));

    assert_eq!(result.method, MatchMethod::Override);
    assert_eq!(result.matched_record_id, Some(RecordId::from("WashingtonDC")));
}

#[test]
fn test_ladder_reports_strictest_tier_cleared() {
    let regions = RegionMatcher::records_from_names(["NewYork", "Washington", "Boston"]);
    let matcher = RegionMatcher::new(regions, &MatchConfig::default());

    // "bostn" vs "boston" is one insertion away: 2 * 5 / 11 = 90.9
    let result = matcher.resolve_now(&MatchQuery::new("Bostn"));
    assert_eq!(result.method, MatchMethod::FuzzyTier(90.0));
    assert_eq!(result.method.label(), "fuzzy_tier_90");
    assert!((result.score - 100.0 * 10.0 / 11.0).abs() < 1e-9, "score was {}", result.score);
    assert_eq!(result.matched_record_id, Some(RecordId::from("Boston")));

    // Compact form: "New York Metro" -> "newyork"
    let result = matcher.resolve_now(&MatchQuery::new("New York Metro"));
    assert_eq!(result.method, MatchMethod::ExactNormalized);
}

#[test]
fn test_truncation_to_max_candidates_is_stable() {
    let catalog: Vec<ReferenceRecord> = (0..5000)
        .map(|i| record(&i.to_string(), Category::Branded, &format!("Chicken Salad {:04}", i)))
        .collect();
    let config = MatchConfig::default();
    let (index, _) = TokenIndex::build(catalog.clone(), IndexSettings::from_config(&config));
    let tokens = tokenize(&normalize("Chicken"), config.min_token_length);

    let first = select_candidates(&index, &tokens, None, config.max_candidates);
    let second = select_candidates(&index, &tokens, None, config.max_candidates);

    assert_eq!(first.raw_count, 5000);
    assert!(first.truncated);
    assert_eq!(first.len(), 3000);
    assert_eq!(first.positions, (0..3000).collect::<Vec<_>>());
    assert_eq!(first, second);

    let matcher = local_matcher(catalog, &config);
    let a = matcher.resolve_now(&MatchQuery::new("Chicken"));
    let b = matcher.resolve_now(&MatchQuery::new("Chicken"));
    assert_eq!(a.candidate_count, 3000);
    assert_eq!(a, b);
    // Every candidate ties on the same substring score; the first one wins
    assert_eq!(a.matched_record_id, Some(RecordId::from("0")));
}

#[tokio::test]
async fn test_registry_batch_end_to_end() {
    let config = MatchConfig::default();
    let mut registry = MatcherRegistry::new();
    registry
        .register(Arc::new(local_matcher(beverage_catalog(), &config)))
        .unwrap();
    registry
        .register(Arc::new(RegionMatcher::new(
            RegionMatcher::records_from_names(["NewYork", "Boston"]),
            &config,
        )))
        .unwrap();
    assert_eq!(registry.ids(), vec!["fdc_local", "region"]);

    let queries = vec![
        MatchQuery::new("Latte"),
        MatchQuery::new("Delivery Fee"),
        MatchQuery::new("green tea"),
    ];
    let output = run_batch(registry.require("fdc_local").unwrap(), queries, 2).await;

    let methods: Vec<MatchMethod> = output.results.iter().map(|r| r.method.clone()).collect();
    assert_eq!(
        methods,
        vec![MatchMethod::Fuzzy, MatchMethod::None, MatchMethod::ExactNormalized]
    );
    assert_eq!(output.results[1].query.raw_text, "Delivery Fee");
}
