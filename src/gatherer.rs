//! Evidence gathering: runs planned queries through the limiter and cache.
//!
//! Each query runs in its own task, bounded by a worker semaphore. Results
//! are collected as they arrive until every query reports or the deadline
//! passes; whatever arrived by then is returned. Tasks still talking to the
//! provider at the deadline are left to finish in the background so their
//! results still land in the cache.

use crate::cache::{fingerprint, EvidenceCache};
use crate::error::Error;
use crate::limiter::RateLimiter;
use crate::models::{Dimension, Evidence};
use crate::planner::SearchQuery;
use crate::provider::ResearchProvider;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Default number of queries in flight at once.
pub const DEFAULT_WORKERS: usize = 4;

/// A query that produced no evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    pub query: String,
    pub dimension: Dimension,
    pub error: Error,
}

/// Everything gathered for one plan.
#[derive(Debug, Clone, Default)]
pub struct GatherOutcome {
    pub evidence: Vec<Evidence>,
    /// Queries that returned a result, cached or fresh.
    pub completed: usize,
    /// Of the completed queries, those served without a provider call.
    pub cache_hits: usize,
    pub failures: Vec<QueryFailure>,
    /// Queries with no result by the deadline.
    pub abandoned: usize,
}

/// Issues research queries with bounded concurrency.
pub struct EvidenceGatherer {
    provider: Arc<dyn ResearchProvider>,
    limiter: Arc<RateLimiter>,
    cache: Arc<EvidenceCache>,
    workers: usize,
}

impl EvidenceGatherer {
    pub fn new(
        provider: Arc<dyn ResearchProvider>,
        limiter: Arc<RateLimiter>,
        cache: Arc<EvidenceCache>,
        workers: usize,
    ) -> Self {
        Self {
            provider,
            limiter,
            cache,
            workers: workers.max(1),
        }
    }

    /// Run every query and collect the evidence that arrives before `deadline`.
    pub async fn gather(
        &self,
        queries: &[SearchQuery],
        location: Option<&str>,
        deadline: Instant,
    ) -> GatherOutcome {
        let mut outcome = GatherOutcome::default();
        if queries.is_empty() {
            return outcome;
        }

        info!(
            "Gathering evidence for {} queries from {} with {} workers",
            queries.len(),
            self.provider.name(),
            self.workers
        );

        let permits = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let location = location.map(String::from);

        for query in queries.iter().cloned() {
            let permits = permits.clone();
            let provider = self.provider.clone();
            let limiter = self.limiter.clone();
            let cache = self.cache.clone();
            let location = location.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let Ok(Ok(_permit)) = timeout_at(deadline, permits.acquire_owned()).await else {
                    debug!(query = %query.text, "no worker before deadline, abandoning");
                    return;
                };
                if Instant::now() >= deadline {
                    return;
                }

                let key = fingerprint(&query.text, location.as_deref());
                let text = query.text.as_str();
                let location = location.as_deref();
                let provider = &provider;
                let limiter = &limiter;

                let result = cache
                    .get_or_fetch(&key, move || async move {
                        limiter.acquire(1, deadline).await?;
                        provider.query(text, location, deadline).await
                    })
                    .await;

                let _ = tx.send((query, result));
            });
        }
        drop(tx);

        let mut received = 0;
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((query, result))) => {
                    received += 1;
                    match result {
                        Ok((batch, from_cache)) => {
                            outcome.completed += 1;
                            if from_cache {
                                outcome.cache_hits += 1;
                            }
                            debug!(
                                query = %query.text,
                                records = batch.len(),
                                from_cache,
                                "query completed"
                            );
                            outcome.evidence.extend(batch.into_iter().map(|mut e| {
                                e.query = query.text.clone();
                                e.dimension = Some(query.dimension);
                                e
                            }));
                        }
                        Err(error) => {
                            if error.is_upstream() {
                                warn!(
                                    provider = self.provider.name(),
                                    "Query '{}' failed: {}", query.text, error
                                );
                            } else {
                                warn!(
                                    "Query '{}' failed outside the provider: {}",
                                    query.text, error
                                );
                            }
                            outcome.failures.push(QueryFailure {
                                query: query.text,
                                dimension: query.dimension,
                                error,
                            });
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Gathering deadline reached with {} of {} queries reported",
                        received,
                        queries.len()
                    );
                    break;
                }
            }
        }

        outcome.abandoned = queries.len() - received;
        info!(
            "Gathered {} evidence records ({} queries ok, {} failed, {} abandoned)",
            outcome.evidence.len(),
            outcome.completed,
            outcome.failures.len(),
            outcome.abandoned
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::Result;
    use crate::limiter::RateLimitConfig;
    use crate::models::EvidenceType;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider that answers every query after an optional delay, failing
    /// queries that contain `fail_on`.
    struct ScriptedProvider {
        calls: AtomicUsize,
        delay: Duration,
        slow_on: Option<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(10),
                slow_on: None,
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl ResearchProvider for ScriptedProvider {
        async fn query(
            &self,
            query: &str,
            _location: Option<&str>,
            _deadline: Instant,
        ) -> Result<Vec<Evidence>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = match self.slow_on {
                Some(marker) if query.contains(marker) => Duration::from_secs(30),
                _ => self.delay,
            };
            tokio::time::sleep(delay).await;

            if self.fail_on.map_or(false, |marker| query.contains(marker)) {
                return Err(Error::UpstreamError("provider down".to_string()));
            }

            Ok(vec![Evidence {
                source: "Scripted".to_string(),
                evidence_type: EvidenceType::News,
                url: Some(format!("https://example.com/{}", query.replace(' ', "-"))),
                snippet: format!("evidence for {}", query),
                quality: 0.8,
                retrieved_at: Utc::now(),
                query: String::new(),
                dimension: None,
            }])
        }
    }

    fn gatherer(provider: Arc<ScriptedProvider>, rps: f64, burst: u32) -> EvidenceGatherer {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: rps,
            burst,
        })
        .unwrap();
        let cache = EvidenceCache::new(CacheConfig::default()).unwrap();
        EvidenceGatherer::new(provider, Arc::new(limiter), Arc::new(cache), 4)
    }

    fn query(dimension: Dimension, text: &str) -> SearchQuery {
        SearchQuery {
            dimension,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_gathers_and_stamps_queries() {
        let provider = Arc::new(ScriptedProvider::new());
        let gatherer = gatherer(provider.clone(), 100.0, 10);
        let queries = vec![
            query(Dimension::Market, "market size"),
            query(Dimension::Risks, "legal risks"),
        ];

        let outcome = gatherer
            .gather(&queries, None, Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.evidence.len(), 2);
        assert_eq!(outcome.abandoned, 0);
        let risks = outcome
            .evidence
            .iter()
            .find(|e| e.query == "legal risks")
            .unwrap();
        assert_eq!(risks.dimension, Some(Dimension::Risks));
    }

    #[tokio::test]
    async fn test_failures_are_absorbed() {
        let provider = Arc::new(ScriptedProvider {
            fail_on: Some(""),
            ..ScriptedProvider::new()
        });
        let gatherer = gatherer(provider, 100.0, 10);
        let queries = vec![
            query(Dimension::Market, "a"),
            query(Dimension::Problem, "b"),
        ];

        let outcome = gatherer
            .gather(&queries, None, Instant::now() + Duration::from_secs(5))
            .await;

        assert!(outcome.evidence.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_evidence() {
        let provider = Arc::new(ScriptedProvider {
            slow_on: Some("slow"),
            ..ScriptedProvider::new()
        });
        let gatherer = gatherer(provider, 100.0, 10);
        let queries = vec![
            query(Dimension::Market, "fast one"),
            query(Dimension::Problem, "slow one"),
        ];

        let start = Instant::now();
        let outcome = gatherer
            .gather(&queries, None, start + Duration::from_millis(500))
            .await;

        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.abandoned, 1);
        assert_eq!(outcome.evidence.len(), 1);
        assert!(Instant::now() - start <= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_identical_queries_hit_provider_once() {
        let provider = Arc::new(ScriptedProvider::new());
        let gatherer = gatherer(provider.clone(), 100.0, 10);
        let queries = vec![
            query(Dimension::Market, "Coding Assistant"),
            query(Dimension::Problem, "coding   assistant"),
        ];

        let outcome = gatherer
            .gather(&queries, None, Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.cache_hits, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_timeout_is_a_query_failure() {
        let provider = Arc::new(ScriptedProvider {
            delay: Duration::ZERO,
            ..ScriptedProvider::new()
        });
        let gatherer = gatherer(provider, 1.0, 1);
        let queries = vec![
            query(Dimension::Market, "one"),
            query(Dimension::Problem, "two"),
            query(Dimension::Barriers, "three"),
        ];

        let outcome = gatherer
            .gather(
                &queries,
                None,
                Instant::now() + Duration::from_millis(1500),
            )
            .await;

        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            Error::RateLimitTimeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_plan_gathers_nothing() {
        let provider = Arc::new(ScriptedProvider::new());
        let gatherer = gatherer(provider.clone(), 1.0, 1);

        let outcome = gatherer
            .gather(&[], None, Instant::now() + Duration::from_secs(1))
            .await;

        assert!(outcome.evidence.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
