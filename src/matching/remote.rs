// src/matching/remote.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::sync::{Mutex, OnceCell};

use crate::cache::ResultCache;
use crate::config::MatchConfig;
use crate::fetch::{fetch_with_retry, RemoteFetcher, RequestBudget, RetryPolicy};
use crate::matching::normalize::normalize;
use crate::matching::policy::{AcceptancePolicy, OverrideMap};
use crate::matching::scorer::Scorer;
use crate::matching::Matcher;
use crate::models::{
    Category, CategoryFilter, MatchMethod, MatchQuery, MatchResult, ReferenceRecord, RemoteFood,
};

pub const FDC_REMOTE_MATCHER_ID: &str = "fdc_remote";

// Fetched candidates plus the failure text, if any
type Lookup = (Vec<RemoteFood>, Option<String>);

/// Cache key for a remote lookup: raw query text and the filter's API labels.
pub fn cache_key(raw: &str, filter: &CategoryFilter) -> String {
    format!("{}|{}", raw, filter.api_labels())
}

/// Resolves queries against a catalog that is searched per query.
///
/// Each distinct (query, filter) key is fetched at most once per cache file.
/// Concurrent lookups of the same key share a single in-flight fetch.
/// Fetch failures and an exhausted request budget both leave the query with
/// zero candidates; the failure text is kept on the result.
pub struct RemoteCatalogMatcher {
    fetcher: Arc<dyn RemoteFetcher>,
    cache: Arc<ResultCache<Vec<RemoteFood>>>,
    budget: Arc<RequestBudget>,
    retry: RetryPolicy,
    overrides: OverrideMap,
    policy: AcceptancePolicy,
    scorer: Scorer,
    max_candidates: usize,
    fallback: Vec<Category>,
    inter_request_sleep: Duration,
    inflight: Mutex<HashMap<String, Arc<OnceCell<Lookup>>>>,
}

impl RemoteCatalogMatcher {
    pub fn new(
        fetcher: Arc<dyn RemoteFetcher>,
        cache: Arc<ResultCache<Vec<RemoteFood>>>,
        config: &MatchConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            budget: Arc::new(RequestBudget::new(config.request_budget)),
            retry: RetryPolicy::from_config(config),
            overrides: OverrideMap::from(config.override_map.clone()),
            policy: AcceptancePolicy::MinScore(config.min_score),
            scorer: Scorer::new(config.include_secondary_signal),
            max_candidates: config.max_candidates,
            fallback: config.fallback_categories.clone(),
            inter_request_sleep: config.inter_request_sleep(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn budget(&self) -> &RequestBudget {
        &self.budget
    }

    pub fn cache(&self) -> &ResultCache<Vec<RemoteFood>> {
        &self.cache
    }

    /// Filter in effect for a query: its own, else its food kind's, else the fallback set.
    pub fn filter_for(&self, query: &MatchQuery) -> CategoryFilter {
        match &query.category_filter {
            Some(filter) => filter.clone(),
            None => CategoryFilter::for_food_kind(query.food_kind, &self.fallback),
        }
    }

    /// Cached payload or a fresh fetch. The error string is set when the
    /// fetch failed or the budget was exhausted; every caller waiting on the
    /// same key receives the same outcome.
    async fn candidates_for(&self, raw: &str, filter: &CategoryFilter) -> Lookup {
        let key = cache_key(raw, filter);
        if let Some(foods) = self.cache.get(&key) {
            trace!("Cache hit for '{}'", key);
            return (foods, None);
        }

        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let lookup = cell
            .get_or_init(|| self.fetch_uncached(raw, filter, &key))
            .await
            .clone();

        // Later lookups go through the cache, or retry a failed key
        let mut inflight = self.inflight.lock().await;
        if inflight.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            inflight.remove(&key);
        }
        lookup
    }

    async fn fetch_uncached(&self, raw: &str, filter: &CategoryFilter, key: &str) -> Lookup {
        if let Some(foods) = self.cache.get(key) {
            trace!("Cache hit for '{}' after waiting", key);
            return (foods, None);
        }

        if !self.budget.try_acquire() {
            warn!("Request budget exhausted, skipping remote lookup for '{}'", raw);
            return (Vec::new(), Some("request budget exhausted".to_string()));
        }

        let outcome = fetch_with_retry(self.fetcher.as_ref(), raw, filter, self.retry).await;
        if !self.inter_request_sleep.is_zero() {
            tokio::time::sleep(self.inter_request_sleep).await;
        }

        match outcome {
            Ok(outcome) => {
                if let Err(e) = self.cache.append(key, &outcome.foods) {
                    warn!("Could not cache '{}': {}", key, e);
                }
                (outcome.foods, None)
            }
            Err(e) => (Vec::new(), Some(e.to_string())),
        }
    }

    pub async fn resolve_query(&self, query: &MatchQuery) -> MatchResult {
        if let Some(target) = self.overrides.get(&query.raw_text) {
            debug!("Override hit for '{}' -> {}", query.raw_text, target);
            return MatchResult::overridden(query.clone(), target.clone());
        }

        let normalized = normalize(&query.raw_text);
        if normalized.is_empty() {
            return MatchResult::unmatched(query.clone(), 0.0, 0);
        }

        let filter = self.filter_for(query);
        let (foods, fetch_error) = self.candidates_for(&query.raw_text, &filter).await;

        let mut records: Vec<ReferenceRecord> =
            foods.iter().filter_map(RemoteFood::to_reference_record).collect();

        if let Some(record) = records.iter().find(|r| r.normalized_text() == normalized) {
            return MatchResult::matched(query.clone(), record, 100.0, MatchMethod::ExactNormalized, 0)
                .with_fetch_error(fetch_error);
        }

        if records.len() > self.max_candidates {
            debug!(
                "Truncated {} fetched candidates to {} for '{}'",
                records.len(),
                self.max_candidates,
                query.raw_text
            );
            records.truncate(self.max_candidates);
        }
        let count = records.len();

        let best = self.scorer.best(
            &normalized,
            query.secondary_text.as_deref(),
            records.iter().enumerate(),
        );
        let result = match best {
            Some(best) => match (self.policy.decide(best.score), records.get(best.position)) {
                (Some(method), Some(record)) => {
                    MatchResult::matched(query.clone(), record, best.score, method, count)
                }
                _ => MatchResult::unmatched(query.clone(), best.score, count),
            },
            None => MatchResult::unmatched(query.clone(), 0.0, count),
        };
        result.with_fetch_error(fetch_error)
    }
}

#[async_trait]
impl Matcher for RemoteCatalogMatcher {
    fn id(&self) -> &'static str {
        FDC_REMOTE_MATCHER_ID
    }

    async fn resolve(&self, query: &MatchQuery) -> MatchResult {
        self.resolve_query(query).await
    }
}
