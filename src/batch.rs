// src/batch.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use log::{info, warn};

use crate::matching::Matcher;
use crate::models::{MatchQuery, MatchResult};

// Log progress every this many resolved queries
const PROGRESS_INTERVAL: usize = 500;

#[derive(Debug)]
pub struct BatchOutput {
    /// One result per query, in input order.
    pub results: Vec<MatchResult>,
    pub elapsed: Duration,
}

/// Resolves every query with at most `concurrency` in flight.
///
/// Each query runs in its own task. A task that panics yields an unmatched
/// result carrying the failure instead of aborting the batch.
pub async fn run_batch(
    matcher: Arc<dyn Matcher>,
    queries: Vec<MatchQuery>,
    concurrency: usize,
) -> BatchOutput {
    let start = Instant::now();
    let total = queries.len();
    let concurrency = concurrency.max(1);
    info!(
        "Resolving {} queries with '{}' using {} concurrent workers",
        total,
        matcher.id(),
        concurrency
    );

    let mut results: Vec<MatchResult> = Vec::with_capacity(total);
    let mut resolved = stream::iter(queries)
        .map(|query| {
            let matcher = matcher.clone();
            async move {
                let fallback = query.clone();
                match tokio::spawn(async move { matcher.resolve(&query).await }).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Worker task for '{}' failed: {}", fallback.raw_text, e);
                        MatchResult::unmatched(fallback, 0.0, 0)
                            .with_fetch_error(Some(format!("worker task failed: {}", e)))
                    }
                }
            }
        })
        .buffered(concurrency);

    while let Some(result) = resolved.next().await {
        results.push(result);
        if results.len() % PROGRESS_INTERVAL == 0 {
            info!(
                "Progress: {}/{} queries ({:.1}%) in {:.2?}",
                results.len(),
                total,
                100.0 * results.len() as f64 / total as f64,
                start.elapsed()
            );
        }
    }

    let elapsed = start.elapsed();
    info!(
        "Resolved {} queries in {:.2?} ({} matched)",
        results.len(),
        elapsed,
        results.iter().filter(|r| r.is_matched()).count()
    );
    BatchOutput { results, elapsed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::{MatchMethod, RecordId};

    struct Echo;

    #[async_trait]
    impl Matcher for Echo {
        fn id(&self) -> &'static str {
            "echo"
        }

        async fn resolve(&self, query: &MatchQuery) -> MatchResult {
            if query.raw_text == "panic" {
                panic!("boom");
            }
            // Later queries finish first so ordering is exercised
            let delay = 20u64.saturating_sub(query.raw_text.len() as u64);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            MatchResult::overridden(query.clone(), RecordId(query.raw_text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let queries: Vec<MatchQuery> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| MatchQuery::new(*s))
            .collect();
        let output = run_batch(Arc::new(Echo), queries, 3).await;
        let ids: Vec<String> = output
            .results
            .iter()
            .map(|r| r.matched_record_id.clone().unwrap().0)
            .collect();
        assert_eq!(ids, vec!["A", "BB", "CCC", "DDDD", "EEEEE"]);
    }

    #[tokio::test]
    async fn test_panicking_query_does_not_abort_batch() {
        let queries = vec![MatchQuery::new("ok"), MatchQuery::new("panic"), MatchQuery::new("fine")];
        let output = run_batch(Arc::new(Echo), queries, 0).await;
        assert_eq!(output.results.len(), 3);
        assert_eq!(output.results[1].method, MatchMethod::None);
        assert!(output.results[1].fetch_error.is_some());
        assert!(output.results[2].is_matched());
    }
}
