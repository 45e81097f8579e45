//! RealityCheck - evidence-backed startup idea analysis
//!
//! A CLI that researches an idea through an OpenAI-compatible API, scores
//! it across six dimensions and writes a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Analysis completed (possibly with missing dimensions)
//!   1 - Runtime error (configuration, invalid input, I/O, etc.)
//!   2 - Analysis failed (no dimension could be scored)

mod cli;
mod config;
mod report;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use realitycheck::cache::{DiskStore, EvidenceCache};
use realitycheck::models::{AnalysisOptions, AnalysisStatus};
use realitycheck::planner::SearchPlanner;
use realitycheck::provider::LlmResearchProvider;
use realitycheck::{Analysis, AnalysisRequest, Idea, Orchestrator, Services};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let (config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, &config);

    info!("RealityCheck v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);
    debug!("Arguments: {:?}", args);

    match run_analysis(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .realitycheck.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to tune rate limits, cache, timeouts and dimension weights.");
    Ok(())
}

/// Initialize logging from --verbose/--quiet, falling back to the configured level.
fn init_logging(args: &Args, config: &Config) {
    let level = args.log_level().unwrap_or_else(|| {
        tracing::Level::from_str(&config.general.log_level).unwrap_or(tracing::Level::INFO)
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration: file, then environment, then CLI flags.
fn load_config(args: &Args) -> Result<(Config, String)> {
    let (mut config, source) = match args.config {
        Some(ref path) => (Config::load(path)?, path.display().to_string()),
        None => match Config::load_default()? {
            Some(config) => (config, CONFIG_FILE.to_string()),
            None => (Config::default(), "defaults".to_string()),
        },
    };

    config.apply_env();
    config.merge_with_args(args);
    config.validate().context("Invalid configuration")?;

    Ok((config, source))
}

fn build_request(args: &Args, config: &Config) -> Result<AnalysisRequest> {
    let mut idea = Idea::new(
        args.title.as_deref().unwrap_or_default(),
        args.pitch.as_deref().unwrap_or_default(),
    );
    if let Some(ref category) = args.category {
        idea = idea.with_category(category.clone());
    }
    if let Some(ref location) = args.location {
        idea = idea.with_location(location.clone());
    }

    let request = AnalysisRequest::new(idea).with_options(AnalysisOptions {
        max_evidence: config.analysis.max_evidence,
        per_query_cap: config.analysis.max_evidence_per_query,
        location_bias: None,
    });
    request.validate().context("Invalid idea")?;
    Ok(request)
}

/// Run one analysis end to end. Returns exit code (0 or 2).
async fn run_analysis(args: Args, config: Config) -> Result<i32> {
    let request = build_request(&args, &config)?;
    let settings = config.to_settings();

    if args.dry_run {
        return handle_dry_run(&request, settings.max_queries);
    }

    if config.provider.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; the research provider may reject requests");
    }

    println!("🔬 Analyzing: {}", request.idea.title);
    println!("   Model: {}", config.provider.model);
    println!("   Queries: up to {}", settings.max_queries);
    println!("   Timeout: {}", humantime::format_duration(settings.analysis_timeout));

    let provider = Arc::new(LlmResearchProvider::new(config.provider_config())?);
    let mut services = Services::new(provider, &settings)?;

    if config.cache.persistent {
        let store = DiskStore::new(&config.cache.dir).with_context(|| {
            format!(
                "Failed to open cache directory {}",
                config.cache.dir.display()
            )
        })?;
        let cache = EvidenceCache::with_store(settings.cache, Arc::new(store))?;
        match cache.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} expired cache entries", removed),
            Err(e) => warn!("Failed to purge expired cache entries: {}", e),
        }
        services.cache = Arc::new(cache);
        info!("Evidence cache at {}", config.cache.dir.display());
    } else {
        info!("Persistent evidence cache disabled");
    }

    let orchestrator = Orchestrator::new(settings, services)?;
    let id = orchestrator.submit(request)?;

    if let Ok(updates) = orchestrator.subscribe(id) {
        show_progress(updates, args.quiet).await?;
    }
    let analysis = orchestrator.wait_for(id).await?;

    let cache = orchestrator.cache();
    let stats = cache.stats();
    debug!(
        entries = cache.memory_entries().await,
        hits = stats.hits,
        misses = stats.misses,
        fetches = stats.fetches,
        "cache activity"
    );

    // Generate and save the report
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&analysis)?,
        OutputFormat::Markdown => report::generate_markdown_report(&analysis),
    };

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.general.output));
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    print_summary(&analysis);
    println!("\n📝 Report saved to: {}", output_path.display());

    if analysis.status == AnalysisStatus::Failed {
        eprintln!("\n⛔ Analysis failed (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Show a spinner that follows the analysis status until it is terminal.
async fn show_progress(mut updates: watch::Receiver<Analysis>, quiet: bool) -> Result<()> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    loop {
        let status = updates.borrow_and_update().status;
        spinner.set_message(status_message(status));
        if status.is_terminal() || updates.changed().await.is_err() {
            break;
        }
    }

    spinner.finish_and_clear();
    Ok(())
}

fn status_message(status: AnalysisStatus) -> &'static str {
    match status {
        AnalysisStatus::Pending => "Waiting to start...",
        AnalysisStatus::Gathering => "Gathering evidence...",
        AnalysisStatus::Analyzing => "Analyzing dimensions...",
        AnalysisStatus::Scoring => "Scoring...",
        AnalysisStatus::Completed => "Done",
        AnalysisStatus::Failed => "Failed",
    }
}

fn print_summary(analysis: &Analysis) {
    println!("\n📊 Analysis Summary:");
    match (analysis.overall_score, analysis.verdict) {
        (Some(score), Some(verdict)) => {
            println!("   {} {} ({}/100)", verdict.emoji(), verdict, score);
        }
        _ => println!(
            "   ❌ {}",
            analysis.error.as_deref().unwrap_or("No overall score")
        ),
    }
    for score in &analysis.scores {
        println!("   - {}: {:.0}", score.dimension, score.score);
    }
    if analysis.is_partial() {
        let missing: Vec<_> = analysis
            .missing_dimensions
            .iter()
            .map(|d| d.as_str())
            .collect();
        println!("   ⚠️  Missing dimensions: {}", missing.join(", "));
    }
    println!(
        "   Evidence: {} kept of {} gathered | Queries: {} planned, {} failed",
        analysis.stats.evidence_kept,
        analysis.stats.evidence_raw,
        analysis.stats.queries_planned,
        analysis.stats.queries_failed
    );
    println!(
        "   Duration: {:.1}s",
        analysis.stats.elapsed_ms as f64 / 1000.0
    );
}

/// Handle --dry-run: print the research plan and exit.
fn handle_dry_run(request: &AnalysisRequest, max_queries: usize) -> Result<i32> {
    println!("\n🔍 Dry run: planning research (no provider calls)...\n");

    let plan = SearchPlanner::new(max_queries).plan(request);

    if plan.is_empty() {
        println!("   No research queries would be issued.");
    } else {
        println!("   {} queries would be issued:\n", plan.len());
        for query in &plan {
            println!("     🔎 {}", query);
        }
    }

    println!("\n✅ Dry run complete. No provider calls were made.");
    Ok(0)
}
