// src/fetch.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{self, MatchConfig};
use crate::error::MatchError;
use crate::models::{CategoryFilter, RemoteFood};

/// Source of candidate records that requires a network call per query.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, query: &str, filter: &CategoryFilter) -> Result<Vec<RemoteFood>, MatchError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    page_size: usize,
    data_type: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    foods: Vec<RemoteFood>,
}

/// FoodData Central search client.
pub struct FdcClient {
    http_client: Client,
    endpoint: Url,
    page_size: usize,
}

impl FdcClient {
    pub fn new(api_key: &str, config: &MatchConfig) -> anyhow::Result<Self> {
        Self::with_endpoint(config::FDC_SEARCH_URL, api_key, config)
    }

    pub fn with_endpoint(endpoint: &str, api_key: &str, config: &MatchConfig) -> anyhow::Result<Self> {
        let mut endpoint = Url::parse(endpoint)?;
        endpoint.query_pairs_mut().append_pair("api_key", api_key);

        let http_client = Client::builder()
            .timeout(config.fetch_timeout())
            .build()?;

        Ok(Self {
            http_client,
            endpoint,
            page_size: config.page_size,
        })
    }
}

#[async_trait]
impl RemoteFetcher for FdcClient {
    async fn fetch(&self, query: &str, filter: &CategoryFilter) -> Result<Vec<RemoteFood>, MatchError> {
        let request = SearchRequest {
            query,
            page_size: self.page_size,
            data_type: filter.categories().iter().map(|c| c.api_label()).collect(),
        };

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| MatchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(MatchError::RateLimited {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MatchError::Network(format!(
                "search returned status {}: {}",
                status, error_text
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| MatchError::Network(format!("unreadable search response: {}", e)))?;
        Ok(body.foods)
    }
}

/// Bounded retry with linear backoff (`base * attempt`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &MatchConfig) -> Self {
        Self {
            retries: config.retries,
            backoff_base: config.retry_backoff_base(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub foods: Vec<RemoteFood>,
    pub attempts: u32,
}

/// Calls `fetcher` until it succeeds, fails with a non-retryable error, or
/// the attempts run out. Only rate-limit responses are retried.
pub async fn fetch_with_retry(
    fetcher: &dyn RemoteFetcher,
    query: &str,
    filter: &CategoryFilter,
    policy: RetryPolicy,
) -> Result<FetchOutcome, MatchError> {
    let start = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match fetcher.fetch(query, filter).await {
            Ok(foods) => {
                debug!(
                    "Fetched {} foods for '{}' in {} attempt(s), {:.2?}",
                    foods.len(),
                    query,
                    attempt,
                    start.elapsed()
                );
                return Ok(FetchOutcome {
                    foods,
                    attempts: attempt,
                });
            }
            Err(e) if e.is_retryable() && attempt <= policy.retries => {
                let delay = policy.backoff(attempt);
                info!(
                    "Retry {}/{} for '{}' after {}, waiting {:.2?}",
                    attempt, policy.retries, query, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    "Fetch for '{}' failed after {} attempt(s): {}",
                    query, attempt, e
                );
                return Err(e);
            }
        }
    }
}

/// Global cap on remote calls for a run. Shared by reference across workers.
#[derive(Debug)]
pub struct RequestBudget {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl RequestBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Reserves one call. Returns false once the cap is reached.
    pub fn try_acquire(&self) -> bool {
        match self.limit {
            None => {
                self.used.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(limit) => self
                .used
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    (used < limit).then_some(used + 1)
                })
                .is_ok(),
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit.map(|limit| self.used() >= limit).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<Vec<Result<Vec<RemoteFood>, MatchError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(mut responses: Vec<Result<Vec<RemoteFood>, MatchError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteFetcher for Scripted {
        async fn fetch(&self, _query: &str, _filter: &CategoryFilter) -> Result<Vec<RemoteFood>, MatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(MatchError::Network("script exhausted".to_string())))
        }
    }

    fn food(id: i64) -> RemoteFood {
        RemoteFood {
            fdc_id: Some(id),
            description: Some("Caffe latte".to_string()),
            data_type: Some("FNDDS".to_string()),
            brand_owner: None,
            brand_name: None,
        }
    }

    fn no_wait(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff_base: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_rate_limits() {
        let fetcher = Scripted::new(vec![
            Err(MatchError::RateLimited { status: 429 }),
            Err(MatchError::RateLimited { status: 503 }),
            Ok(vec![food(1)]),
        ]);
        let filter = CategoryFilter::new(vec![]);
        let outcome = fetch_with_retry(&fetcher, "latte", &filter, no_wait(2)).await.unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.foods, vec![food(1)]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let fetcher = Scripted::new(vec![
            Err(MatchError::RateLimited { status: 429 }),
            Err(MatchError::RateLimited { status: 429 }),
            Ok(vec![food(1)]),
        ]);
        let filter = CategoryFilter::new(vec![]);
        let err = fetch_with_retry(&fetcher, "latte", &filter, no_wait(1)).await.unwrap_err();
        assert!(matches!(err, MatchError::RateLimited { status: 429 }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_errors_are_not_retried() {
        let fetcher = Scripted::new(vec![
            Err(MatchError::Network("connection reset".to_string())),
            Ok(vec![food(1)]),
        ]);
        let filter = CategoryFilter::new(vec![]);
        let err = fetch_with_retry(&fetcher, "latte", &filter, no_wait(5)).await.unwrap_err();
        assert!(matches!(err, MatchError::Network(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy {
            retries: 3,
            backoff_base: Duration::from_secs(2),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(6));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_budget_stops_at_limit() {
        let budget = RequestBudget::new(Some(2));
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        assert!(budget.is_exhausted());
        assert_eq!(budget.used(), 2);

        let open = RequestBudget::unlimited();
        for _ in 0..10 {
            assert!(open.try_acquire());
        }
        assert!(!open.is_exhausted());
    }

    #[test]
    fn test_request_body_uses_api_labels() {
        let filter = CategoryFilter::new(vec![crate::models::Category::SurveyFndds, crate::models::Category::SrLegacy]);
        let request = SearchRequest {
            query: "latte",
            page_size: 10,
            data_type: filter.categories().iter().map(|c| c.api_label()).collect(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["pageSize"], 10);
        assert_eq!(json["dataType"], serde_json::json!(["FNDDS", "SR Legacy"]));
    }
}
