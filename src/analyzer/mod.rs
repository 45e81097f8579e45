//! Dimension analyzers and the pool that runs them.
//!
//! Each analyzer runs in its own task with its own deadline. A timeout,
//! error or panic in one analyzer is recorded as a failure for that
//! dimension only; the others keep running.

pub mod heuristic;

pub use heuristic::{default_analyzers, SignalAnalyzer};

use crate::error::{Error, Result};
use crate::models::{Dimension, DimensionScore, Evidence, Idea};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Default time budget for a single analyzer.
pub const DEFAULT_ANALYZER_TIMEOUT: Duration = Duration::from_secs(30);

/// Scores one dimension of an idea from curated evidence.
#[async_trait]
pub trait DimensionAnalyzer: Send + Sync {
    /// The dimension this analyzer scores.
    fn dimension(&self) -> Dimension;

    /// Produce a score for `idea` from `evidence`.
    async fn analyze(&self, idea: &Idea, evidence: &[Evidence]) -> Result<DimensionScore>;
}

/// Why a dimension produced no score.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Timeout,
    Error(Error),
    Panicked(String),
    InvalidScore(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timed out"),
            FailureReason::Error(e) => write!(f, "{}", e),
            FailureReason::Panicked(msg) => write!(f, "panicked: {}", msg),
            FailureReason::InvalidScore(msg) => write!(f, "invalid score: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimensionFailure {
    pub dimension: Dimension,
    pub reason: FailureReason,
}

/// Scores and failures from one pool run, both in canonical order.
#[derive(Debug, Clone, Default)]
pub struct PoolOutcome {
    pub scores: Vec<DimensionScore>,
    pub failures: Vec<DimensionFailure>,
}

impl PoolOutcome {
    /// Dimensions without a score, including any with no registered analyzer.
    pub fn missing(&self) -> Vec<Dimension> {
        Dimension::ALL
            .into_iter()
            .filter(|d| !self.scores.iter().any(|s| s.dimension == *d))
            .collect()
    }
}

/// Runs one analyzer per dimension concurrently.
pub struct AnalyzerPool {
    analyzers: Vec<Arc<dyn DimensionAnalyzer>>,
    analyzer_timeout: Duration,
}

impl AnalyzerPool {
    /// Build a pool. At most one analyzer per dimension is allowed.
    pub fn new(
        analyzers: Vec<Arc<dyn DimensionAnalyzer>>,
        analyzer_timeout: Duration,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for analyzer in &analyzers {
            if !seen.insert(analyzer.dimension()) {
                return Err(Error::Config(format!(
                    "more than one analyzer registered for {}",
                    analyzer.dimension().as_str()
                )));
            }
        }
        if analyzer_timeout.is_zero() {
            return Err(Error::Config("analyzer timeout must be positive".to_string()));
        }

        Ok(Self {
            analyzers,
            analyzer_timeout,
        })
    }

    pub fn dimensions(&self) -> Vec<Dimension> {
        let mut dims: Vec<_> = self.analyzers.iter().map(|a| a.dimension()).collect();
        dims.sort();
        dims
    }

    /// Run every analyzer. Each one gets the smaller of its own timeout and
    /// the time left before `deadline`.
    pub async fn run(
        &self,
        idea: &Idea,
        evidence: &[Evidence],
        deadline: Instant,
    ) -> PoolOutcome {
        let idea = Arc::new(idea.clone());
        let evidence: Arc<[Evidence]> = Arc::from(evidence);
        let slice_deadline = (Instant::now() + self.analyzer_timeout).min(deadline);

        info!(
            "Running {} analyzers over {} evidence records",
            self.analyzers.len(),
            evidence.len()
        );

        let mut pending: FuturesUnordered<_> = self
            .analyzers
            .iter()
            .map(|analyzer| {
                let analyzer = analyzer.clone();
                let dimension = analyzer.dimension();
                let idea = idea.clone();
                let evidence = evidence.clone();
                tokio::spawn(async move {
                    timeout_at(slice_deadline, analyzer.analyze(&idea, &evidence)).await
                })
                .map(move |joined| (dimension, joined))
            })
            .collect();

        let mut outcome = PoolOutcome::default();
        let mut reported = HashSet::new();

        loop {
            let next = match timeout_at(deadline, pending.next()).await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(_) => {
                    warn!("Analysis deadline reached with analyzers still running");
                    break;
                }
            };

            let (dimension, joined) = next;
            reported.insert(dimension);

            let result = match joined {
                Ok(Ok(Ok(score))) => validate_score(dimension, score),
                Ok(Ok(Err(e))) => Err(FailureReason::Error(e)),
                Ok(Err(_)) => Err(FailureReason::Timeout),
                Err(join_error) => Err(FailureReason::Panicked(join_error.to_string())),
            };

            match result {
                Ok(score) => {
                    debug!(
                        dimension = dimension.as_str(),
                        score = score.score,
                        "analyzer finished"
                    );
                    outcome.scores.push(score);
                }
                Err(reason) => {
                    warn!("Analyzer {} failed: {}", dimension, reason);
                    outcome.failures.push(DimensionFailure { dimension, reason });
                }
            }
        }

        for analyzer in &self.analyzers {
            let dimension = analyzer.dimension();
            if !reported.contains(&dimension) {
                outcome.failures.push(DimensionFailure {
                    dimension,
                    reason: FailureReason::Timeout,
                });
            }
        }

        outcome.scores.sort_by_key(|s| s.dimension.index());
        outcome.failures.sort_by_key(|f| f.dimension.index());
        outcome
    }
}

fn validate_score(
    dimension: Dimension,
    mut score: DimensionScore,
) -> std::result::Result<DimensionScore, FailureReason> {
    if score.dimension != dimension {
        return Err(FailureReason::InvalidScore(format!(
            "analyzer for {} returned a {} score",
            dimension.as_str(),
            score.dimension.as_str()
        )));
    }
    if !score.score.is_finite() {
        return Err(FailureReason::InvalidScore(format!(
            "{} is not a finite number",
            score.score
        )));
    }
    score.score = score.score.clamp(0.0, 100.0);
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Behavior {
        Score(f64),
        Sleep(Duration),
        Fail,
        Panic,
        WrongDimension,
    }

    struct TestAnalyzer {
        dimension: Dimension,
        behavior: Behavior,
    }

    #[async_trait]
    impl DimensionAnalyzer for TestAnalyzer {
        fn dimension(&self) -> Dimension {
            self.dimension
        }

        async fn analyze(&self, _idea: &Idea, _evidence: &[Evidence]) -> Result<DimensionScore> {
            let score = match self.behavior {
                Behavior::Score(s) => s,
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    50.0
                }
                Behavior::Fail => return Err(Error::AnalysisFailed("no signal".to_string())),
                Behavior::Panic => panic!("analyzer bug"),
                Behavior::WrongDimension => {
                    return Ok(DimensionScore {
                        dimension: Dimension::Market,
                        score: 10.0,
                        rationale: String::new(),
                        evidence: vec![],
                    })
                }
            };
            Ok(DimensionScore {
                dimension: self.dimension,
                score,
                rationale: "test".to_string(),
                evidence: vec![],
            })
        }
    }

    fn analyzer(dimension: Dimension, behavior: Behavior) -> Arc<dyn DimensionAnalyzer> {
        Arc::new(TestAnalyzer {
            dimension,
            behavior,
        })
    }

    fn idea() -> Idea {
        Idea::new("Loom", "Agentic coding assistant")
    }

    #[test]
    fn test_rejects_duplicate_dimensions() {
        let result = AnalyzerPool::new(
            vec![
                analyzer(Dimension::Market, Behavior::Score(1.0)),
                analyzer(Dimension::Market, Behavior::Score(2.0)),
            ],
            DEFAULT_ANALYZER_TIMEOUT,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scores_are_in_canonical_order() {
        let pool = AnalyzerPool::new(
            vec![
                analyzer(Dimension::Graveyard, Behavior::Score(10.0)),
                analyzer(Dimension::Market, Behavior::Sleep(Duration::from_millis(30))),
                analyzer(Dimension::Problem, Behavior::Score(30.0)),
            ],
            DEFAULT_ANALYZER_TIMEOUT,
        )
        .unwrap();

        let outcome = pool
            .run(&idea(), &[], Instant::now() + Duration::from_secs(5))
            .await;

        let order: Vec<_> = outcome.scores.iter().map(|s| s.dimension).collect();
        assert_eq!(
            order,
            vec![Dimension::Market, Dimension::Problem, Dimension::Graveyard]
        );
        assert!(outcome.failures.is_empty());
        assert_eq!(
            outcome.missing(),
            vec![Dimension::Barriers, Dimension::Execution, Dimension::Risks]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_timeout_does_not_abort_others() {
        let mut analyzers: Vec<_> = Dimension::ALL
            .into_iter()
            .filter(|d| *d != Dimension::Risks)
            .map(|d| analyzer(d, Behavior::Score(60.0)))
            .collect();
        analyzers.push(analyzer(
            Dimension::Risks,
            Behavior::Sleep(Duration::from_secs(60)),
        ));
        let pool = AnalyzerPool::new(analyzers, Duration::from_secs(1)).unwrap();

        let outcome = pool
            .run(&idea(), &[], Instant::now() + Duration::from_secs(10))
            .await;

        assert_eq!(outcome.scores.len(), 5);
        assert_eq!(
            outcome.failures,
            vec![DimensionFailure {
                dimension: Dimension::Risks,
                reason: FailureReason::Timeout
            }]
        );
        assert_eq!(outcome.missing(), vec![Dimension::Risks]);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_contained() {
        let pool = AnalyzerPool::new(
            vec![
                analyzer(Dimension::Market, Behavior::Score(70.0)),
                analyzer(Dimension::Problem, Behavior::Fail),
                analyzer(Dimension::Barriers, Behavior::Panic),
                analyzer(Dimension::Execution, Behavior::WrongDimension),
            ],
            DEFAULT_ANALYZER_TIMEOUT,
        )
        .unwrap();

        let outcome = pool
            .run(&idea(), &[], Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(outcome.scores.len(), 1);
        assert_eq!(outcome.failures.len(), 3);
        assert!(matches!(outcome.failures[0].reason, FailureReason::Error(_)));
        assert!(matches!(
            outcome.failures[1].reason,
            FailureReason::Panicked(_)
        ));
        assert!(matches!(
            outcome.failures[2].reason,
            FailureReason::InvalidScore(_)
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_scores_are_clamped() {
        let pool = AnalyzerPool::new(
            vec![
                analyzer(Dimension::Market, Behavior::Score(140.0)),
                analyzer(Dimension::Problem, Behavior::Score(-5.0)),
                analyzer(Dimension::Risks, Behavior::Score(f64::NAN)),
            ],
            DEFAULT_ANALYZER_TIMEOUT,
        )
        .unwrap();

        let outcome = pool
            .run(&idea(), &[], Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(outcome.scores[0].score, 100.0);
        assert_eq!(outcome.scores[1].score, 0.0);
        assert_eq!(outcome.failures[0].dimension, Dimension::Risks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_caps_analyzer_slice() {
        let pool = AnalyzerPool::new(
            vec![analyzer(
                Dimension::Market,
                Behavior::Sleep(Duration::from_secs(5)),
            )],
            Duration::from_secs(30),
        )
        .unwrap();

        let start = Instant::now();
        let outcome = pool
            .run(&idea(), &[], start + Duration::from_secs(1))
            .await;

        assert!(outcome.scores.is_empty());
        assert_eq!(outcome.failures[0].reason, FailureReason::Timeout);
        assert!(Instant::now() - start <= Duration::from_secs(1));
    }
}
