//! Configuration file handling.
//!
//! Settings come from `.realitycheck.toml`, then environment variables,
//! then command-line flags, each layer overriding the one before.

use anyhow::{bail, Context, Result};
use realitycheck::cache::CacheConfig;
use realitycheck::limiter::RateLimitConfig;
use realitycheck::normalizer::NormalizerConfig;
use realitycheck::orchestrator::EngineSettings;
use realitycheck::provider::ProviderConfig;
use realitycheck::scoring::Weights;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".realitycheck.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub provider: ProviderSection,

    /// Dimension weights; each positive, summing to 1.0.
    #[serde(default)]
    pub weights: Weights,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Log level when neither --verbose nor --quiet is given.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            log_level: default_log_level(),
        }
    }
}

fn default_output() -> String {
    "realitycheck_report.md".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Outbound request rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            burst: default_burst(),
        }
    }
}

fn default_rps() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    4
}

/// Evidence cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Entries kept in memory.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Directory of the persistent layer.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Keep cached evidence on disk between runs.
    #[serde(default = "default_true")]
    pub persistent: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl: default_ttl(),
            dir: default_cache_dir(),
            persistent: true,
        }
    }
}

fn default_capacity() -> usize {
    4096
}

fn default_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".realitycheck/cache")
}

fn default_true() -> bool {
    true
}

/// Pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    #[serde(default = "default_max_evidence_per_query")]
    pub max_evidence_per_query: usize,

    /// Evidence kept across all queries.
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,

    #[serde(default = "default_analysis_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_analyzer_timeout", with = "humantime_serde")]
    pub analyzer_timeout: Duration,

    /// Research queries in flight at once.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_min_quality")]
    pub min_quality: f64,

    /// Ignore query strings when matching duplicate URLs.
    #[serde(default)]
    pub strip_query: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            max_evidence_per_query: default_max_evidence_per_query(),
            max_evidence: default_max_evidence(),
            timeout: default_analysis_timeout(),
            analyzer_timeout: default_analyzer_timeout(),
            workers: default_workers(),
            min_quality: default_min_quality(),
            strip_query: false,
        }
    }
}

fn default_max_queries() -> usize {
    20
}

fn default_max_evidence_per_query() -> usize {
    10
}

fn default_max_evidence() -> usize {
    60
}

fn default_analysis_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_analyzer_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_workers() -> usize {
    4
}

fn default_min_quality() -> f64 {
    0.3
}

/// Research provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Evidence records requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Prefer the OPENAI_API_KEY environment variable over writing this down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_results: default_max_results(),
            api_key: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_results() -> usize {
    8
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`. Values that fail to parse are ignored
    /// and the current setting stands.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(key) = get("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(rps) = get("OPENAI_RPS").and_then(|v| v.parse().ok()) {
            self.limiter.requests_per_second = rps;
        }
        if let Some(burst) = get("OPENAI_BURST").and_then(|v| v.parse().ok()) {
            self.limiter.burst = burst;
        }
        if let Some(capacity) = get("CACHE_LRU_SIZE").and_then(|v| v.parse().ok()) {
            self.cache.capacity = capacity;
        }
        if let Some(ttl) = get("CACHE_TTL").and_then(|v| humantime::parse_duration(&v).ok()) {
            self.cache.ttl = ttl;
        }
        if let Some(dir) = get("CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(cap) = get("MAX_EVIDENCE_PER_QUERY").and_then(|v| v.parse().ok()) {
            self.analysis.max_evidence_per_query = cap;
        }
        if let Some(max) = get("MAX_QUERIES").and_then(|v| v.parse().ok()) {
            self.analysis.max_queries = max;
        }
        if let Some(timeout) =
            get("ANALYSIS_TIMEOUT").and_then(|v| humantime::parse_duration(&v).ok())
        {
            self.analysis.timeout = timeout;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.general.log_level = level;
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence; only explicitly given flags override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(max_queries) = args.max_queries {
            self.analysis.max_queries = max_queries;
        }
        if let Some(max_evidence) = args.max_evidence {
            self.analysis.max_evidence = max_evidence;
        }
        if let Some(timeout) = args.timeout {
            self.analysis.timeout = timeout;
        }
        if let Some(ref model) = args.model {
            self.provider.model = model.clone();
        }
        if let Some(ref url) = args.provider_url {
            self.provider.base_url = url.clone();
        }
        if args.no_cache {
            self.cache.persistent = false;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rps = self.limiter.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            bail!("limiter.requests_per_second must be positive, got {}", rps);
        }
        if self.limiter.burst == 0 {
            bail!("limiter.burst must be at least 1");
        }
        if self.cache.capacity == 0 {
            bail!("cache.capacity must be at least 1");
        }
        if self.cache.ttl.is_zero() {
            bail!("cache.ttl must be positive");
        }
        if self.analysis.timeout.is_zero() {
            bail!("analysis.timeout must be positive");
        }
        if self.analysis.analyzer_timeout.is_zero() {
            bail!("analysis.analyzer_timeout must be positive");
        }
        if self.analysis.max_evidence_per_query == 0 {
            bail!("analysis.max_evidence_per_query must be at least 1");
        }
        if self.analysis.max_evidence == 0 {
            bail!("analysis.max_evidence must be at least 1");
        }
        if self.analysis.workers == 0 {
            bail!("analysis.workers must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.analysis.min_quality) {
            bail!(
                "analysis.min_quality must be between 0 and 1, got {}",
                self.analysis.min_quality
            );
        }
        if !self.provider.base_url.starts_with("http://")
            && !self.provider.base_url.starts_with("https://")
        {
            bail!("provider.base_url must start with 'http://' or 'https://'");
        }
        self.weights.validate().context("Invalid [weights] section")?;
        Ok(())
    }

    /// Immutable engine settings for one orchestrator.
    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            limiter: RateLimitConfig {
                requests_per_second: self.limiter.requests_per_second,
                burst: self.limiter.burst,
            },
            cache: CacheConfig {
                capacity: self.cache.capacity,
                ttl: self.cache.ttl,
            },
            max_evidence_per_query: self.analysis.max_evidence_per_query,
            max_queries: self.analysis.max_queries,
            analysis_timeout: self.analysis.timeout,
            analyzer_timeout: self.analysis.analyzer_timeout,
            gather_workers: self.analysis.workers,
            normalizer: NormalizerConfig {
                min_quality: self.analysis.min_quality,
                strip_query: self.analysis.strip_query,
            },
            weights: self.weights,
        }
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: self.provider.base_url.clone(),
            api_key: self.provider.api_key.clone(),
            model: self.provider.model.clone(),
            temperature: self.provider.temperature,
            max_results: self.provider.max_results,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
