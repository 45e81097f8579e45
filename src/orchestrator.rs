//! End-to-end analysis runs.
//!
//! The orchestrator owns each analysis record while it runs and is its only
//! writer. Progress is published through a watch channel per analysis so
//! readers always see a consistent snapshot; once the record is terminal it
//! is handed to the analysis store and dropped from the live registry.

use crate::analyzer::{
    default_analyzers, AnalyzerPool, DimensionAnalyzer, DEFAULT_ANALYZER_TIMEOUT,
};
use crate::cache::{CacheConfig, EvidenceCache};
use crate::error::{Error, Result};
use crate::gatherer::{EvidenceGatherer, DEFAULT_WORKERS};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::models::{Analysis, AnalysisRequest, AnalysisStatus};
use crate::normalizer::{EvidenceNormalizer, NormalizerConfig};
use crate::planner::{SearchPlanner, DEFAULT_MAX_QUERIES};
use crate::provider::ResearchProvider;
use crate::scoring::{ScoringAggregator, Weights};
use crate::store::{AnalysisStore, MemoryStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tunables captured once when the orchestrator is built.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub limiter: RateLimitConfig,
    pub cache: CacheConfig,
    /// Upper bound on evidence kept per query, whatever the request asks.
    pub max_evidence_per_query: usize,
    pub max_queries: usize,
    pub analysis_timeout: Duration,
    pub analyzer_timeout: Duration,
    pub gather_workers: usize,
    pub normalizer: NormalizerConfig,
    pub weights: Weights,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            limiter: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            max_evidence_per_query: 10,
            max_queries: DEFAULT_MAX_QUERIES,
            analysis_timeout: Duration::from_secs(60),
            analyzer_timeout: DEFAULT_ANALYZER_TIMEOUT,
            gather_workers: DEFAULT_WORKERS,
            normalizer: NormalizerConfig::default(),
            weights: Weights::default(),
        }
    }
}

/// Collaborators injected into the orchestrator.
pub struct Services {
    pub provider: Arc<dyn ResearchProvider>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<EvidenceCache>,
    pub store: Arc<dyn AnalysisStore>,
    pub analyzers: Vec<Arc<dyn DimensionAnalyzer>>,
}

impl Services {
    /// Default services around `provider`: a limiter and memory cache built
    /// from `settings`, an in-memory store and the built-in analyzers.
    pub fn new(provider: Arc<dyn ResearchProvider>, settings: &EngineSettings) -> Result<Self> {
        Ok(Self {
            provider,
            limiter: Arc::new(RateLimiter::new(settings.limiter)?),
            cache: Arc::new(EvidenceCache::new(settings.cache)?),
            store: Arc::new(MemoryStore::new()),
            analyzers: default_analyzers(),
        })
    }
}

struct Inner {
    settings: EngineSettings,
    planner: SearchPlanner,
    gatherer: EvidenceGatherer,
    normalizer: EvidenceNormalizer,
    pool: AnalyzerPool,
    aggregator: ScoringAggregator,
    cache: Arc<EvidenceCache>,
    store: Arc<dyn AnalysisStore>,
    live: Mutex<HashMap<Uuid, watch::Sender<Analysis>>>,
}

/// Drives analyses from submission to a terminal state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(settings: EngineSettings, services: Services) -> Result<Self> {
        if settings.analysis_timeout.is_zero() {
            return Err(Error::Config("analysis timeout must be positive".to_string()));
        }
        if settings.max_evidence_per_query == 0 {
            return Err(Error::Config(
                "max evidence per query must be at least 1".to_string(),
            ));
        }

        let pool = AnalyzerPool::new(services.analyzers, settings.analyzer_timeout)?;
        let aggregator = ScoringAggregator::new(settings.weights)?;
        let gatherer = EvidenceGatherer::new(
            services.provider,
            services.limiter,
            services.cache.clone(),
            settings.gather_workers,
        );

        info!(
            "Orchestrator ready: {} analyzers, {} max queries, {:?} timeout",
            pool.dimensions().len(),
            settings.max_queries,
            settings.analysis_timeout
        );

        Ok(Self {
            inner: Arc::new(Inner {
                planner: SearchPlanner::new(settings.max_queries),
                normalizer: EvidenceNormalizer::new(settings.normalizer),
                gatherer,
                pool,
                aggregator,
                cache: services.cache,
                store: services.store,
                live: Mutex::new(HashMap::new()),
                settings,
            }),
        })
    }

    pub fn cache(&self) -> &Arc<EvidenceCache> {
        &self.inner.cache
    }

    /// Validate and start an analysis in the background.
    pub fn submit(&self, request: AnalysisRequest) -> Result<Uuid> {
        request.validate()?;

        let analysis = Analysis::new(request);
        let id = analysis.id;
        let (tx, _) = watch::channel(analysis);
        self.live()?.insert(id, tx.clone());

        info!(analysis_id = %id, "analysis submitted");
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run(tx).await;
        });

        Ok(id)
    }

    /// Validate and run an analysis to completion.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<Analysis> {
        let id = self.submit(request)?;
        self.wait_for(id).await
    }

    /// Current snapshot of an analysis, live or stored.
    pub async fn get_analysis(&self, id: Uuid) -> Result<Analysis> {
        let live = self.live()?.get(&id).map(|tx| tx.borrow().clone());
        if let Some(analysis) = live {
            return Ok(analysis);
        }
        self.inner.store.get(id).await?.ok_or(Error::NotFound(id))
    }

    /// Receiver for status updates of a running analysis.
    pub fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<Analysis>> {
        self.live()?
            .get(&id)
            .map(|tx| tx.subscribe())
            .ok_or(Error::NotFound(id))
    }

    /// Wait until the analysis reaches a terminal state.
    pub async fn wait_for(&self, id: Uuid) -> Result<Analysis> {
        let receiver = self.live()?.get(&id).map(|tx| tx.subscribe());

        if let Some(mut rx) = receiver {
            let finished = rx
                .wait_for(|a| a.is_terminal())
                .await
                .map(|analysis| (*analysis).clone());
            if let Ok(analysis) = finished {
                return Ok(analysis);
            }
        }

        self.inner.store.get(id).await?.ok_or(Error::NotFound(id))
    }

    /// Delete a finished analysis. Running analyses cannot be deleted.
    pub async fn delete_analysis(&self, id: Uuid) -> Result<()> {
        let running = self.live()?.contains_key(&id);
        if running {
            return Err(Error::Validation(format!(
                "analysis {} is still running",
                id
            )));
        }
        if self.inner.store.delete(id).await? {
            info!(analysis_id = %id, "analysis deleted");
            Ok(())
        } else {
            Err(Error::NotFound(id))
        }
    }

    pub async fn search_analyses(
        &self,
        text: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Analysis>> {
        self.inner.store.search(text, limit, offset).await
    }

    fn live(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, watch::Sender<Analysis>>>> {
        self.inner
            .live
            .lock()
            .map_err(|_| Error::Storage("live analysis registry poisoned".to_string()))
    }
}

impl Inner {
    async fn run(&self, tx: watch::Sender<Analysis>) {
        let started = Instant::now();
        let mut analysis = tx.borrow().clone();
        let id = analysis.id;

        if let Err(e) = self.execute(&mut analysis, &tx).await {
            error!(analysis_id = %id, "analysis failed: {}", e);
            if !analysis.is_terminal() {
                if let Err(e) = analysis.fail(e.to_string()) {
                    warn!(analysis_id = %id, "could not mark analysis failed: {}", e);
                }
            }
        }
        analysis.stats.elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = self.store.put(&analysis).await {
            error!(analysis_id = %id, "failed to store analysis: {}", e);
        }

        info!(
            analysis_id = %id,
            status = %analysis.status,
            overall = ?analysis.overall_score,
            elapsed_ms = analysis.stats.elapsed_ms,
            "analysis finished"
        );

        tx.send_replace(analysis);
        if let Ok(mut live) = self.live.lock() {
            live.remove(&id);
        }
    }

    async fn execute(&self, analysis: &mut Analysis, tx: &watch::Sender<Analysis>) -> Result<()> {
        let id = analysis.id;

        publish(analysis, tx, AnalysisStatus::Gathering)?;
        let deadline = Instant::now() + self.settings.analysis_timeout;

        let request = analysis.request.clone();
        let plan = self.planner.plan(&request);
        analysis.stats.queries_planned = plan.len();
        if plan.is_empty() {
            warn!(analysis_id = %id, "no research queries planned, scoring without evidence");
        }

        let gathered = self
            .gatherer
            .gather(&plan, request.effective_location(), deadline)
            .await;
        analysis.stats.queries_failed = gathered.failures.len();
        analysis.stats.queries_abandoned = gathered.abandoned;
        analysis.stats.evidence_raw = gathered.evidence.len();

        let per_query_cap = request
            .options
            .per_query_cap
            .min(self.settings.max_evidence_per_query);
        analysis.evidence = self.normalizer.curate(
            gathered.evidence,
            per_query_cap,
            request.options.max_evidence,
        );
        analysis.stats.evidence_kept = analysis.evidence.len();
        debug!(
            analysis_id = %id,
            raw = analysis.stats.evidence_raw,
            kept = analysis.stats.evidence_kept,
            "evidence curated"
        );

        publish(analysis, tx, AnalysisStatus::Analyzing)?;
        let outcome = self
            .pool
            .run(&request.idea, &analysis.evidence, deadline)
            .await;
        analysis.missing_dimensions = outcome.missing();

        if outcome.scores.is_empty() {
            let reasons = outcome
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.dimension.as_str(), f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::AnalysisFailed(format!(
                "no dimension produced a score ({})",
                reasons
            )));
        }

        publish(analysis, tx, AnalysisStatus::Scoring)?;
        for score in outcome.scores {
            analysis.record_score(score)?;
        }
        if analysis.is_partial() {
            let partial = Error::PartialAnalysisFailure {
                missing: analysis.missing_dimensions.clone(),
            };
            warn!(analysis_id = %id, "{}", partial);
        }

        let (overall, verdict) = self
            .aggregator
            .verdict(&analysis.scores)
            .ok_or_else(|| Error::AnalysisFailed("no dimension scores to aggregate".to_string()))?;
        analysis.overall_score = Some(overall);
        analysis.verdict = Some(verdict);

        analysis.advance(AnalysisStatus::Completed)?;
        Ok(())
    }
}

fn publish(
    analysis: &mut Analysis,
    tx: &watch::Sender<Analysis>,
    status: AnalysisStatus,
) -> Result<()> {
    analysis.advance(status)?;
    debug!(analysis_id = %analysis.id, status = %status, "status changed");
    tx.send_replace(analysis.clone());
    Ok(())
}
