//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use realitycheck::models::{MAX_PITCH_CHARS, MAX_TITLE_CHARS};
use std::path::PathBuf;
use std::time::Duration;

/// RealityCheck - evidence-backed startup idea analysis
///
/// Researches an idea across six dimensions (market, problem, barriers,
/// execution, risks, graveyard) and scores it with a weighted verdict.
///
/// Examples:
///   realitycheck --title Loom --pitch "Agentic coding assistant"
///   realitycheck --title Loom --pitch "Agentic coding assistant" --location Germany --format json
///   realitycheck --title Loom --pitch "Agentic coding assistant" --dry-run
///   realitycheck --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Short name of the idea
    #[arg(short, long, required_unless_present = "init_config")]
    pub title: Option<String>,

    /// One-line pitch describing the idea
    #[arg(short, long, required_unless_present = "init_config")]
    pub pitch: Option<String>,

    /// Market category, used to phrase research queries
    #[arg(long, value_name = "CATEGORY")]
    pub category: Option<String>,

    /// Geographic focus for the research
    #[arg(short, long, value_name = "PLACE")]
    pub location: Option<String>,

    /// Maximum research queries to issue
    #[arg(long, value_name = "COUNT")]
    pub max_queries: Option<usize>,

    /// Maximum evidence records kept for analysis
    #[arg(long, value_name = "COUNT")]
    pub max_evidence: Option<usize>,

    /// Overall analysis deadline (e.g. 60s, 2m)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Model used for research queries
    #[arg(short, long, env = "REALITYCHECK_MODEL")]
    pub model: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, value_name = "URL", env = "OPENAI_BASE_URL")]
    pub provider_url: Option<String>,

    /// Output file path for the report
    ///
    /// Defaults to the `general.output` config value.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .realitycheck.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Do not read or write the on-disk evidence cache
    #[arg(long)]
    pub no_cache: bool,

    /// Dry run: print the research plan without calling the provider
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .realitycheck.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        let title = self.title.as_deref().unwrap_or("").trim();
        if title.is_empty() {
            return Err("Title must not be empty".to_string());
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(format!("Title must be at most {} characters", MAX_TITLE_CHARS));
        }

        let pitch = self.pitch.as_deref().unwrap_or("").trim();
        if pitch.is_empty() {
            return Err("Pitch must not be empty".to_string());
        }
        if pitch.chars().count() > MAX_PITCH_CHARS {
            return Err(format!("Pitch must be at most {} characters", MAX_PITCH_CHARS));
        }

        if let Some(ref url) = self.provider_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Provider URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err("Timeout must be positive".to_string());
            }
        }

        if self.max_evidence == Some(0) {
            return Err("Max evidence must be at least 1".to_string());
        }

        Ok(())
    }

    /// Log level forced by --verbose or --quiet, if any.
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.quiet {
            Some(tracing::Level::ERROR)
        } else if self.verbose {
            Some(tracing::Level::DEBUG)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            title: Some("Loom".to_string()),
            pitch: Some("Agentic coding assistant".to_string()),
            category: None,
            location: None,
            max_queries: None,
            max_evidence: None,
            timeout: None,
            model: None,
            provider_url: None,
            output: None,
            format: OutputFormat::Markdown,
            config: None,
            verbose: false,
            quiet: false,
            no_cache: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_valid_args() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_empty_pitch() {
        let mut args = make_args();
        args.pitch = Some("   ".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_long_title() {
        let mut args = make_args();
        args.title = Some("x".repeat(MAX_TITLE_CHARS + 1));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_provider_url() {
        let mut args = make_args();
        args.provider_url = Some("localhost:8080".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_init_config_skips_validation() {
        let mut args = make_args();
        args.title = None;
        args.pitch = None;
        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_timeout() {
        let args = Args::try_parse_from([
            "realitycheck",
            "--title",
            "Loom",
            "--pitch",
            "Agentic coding assistant",
            "--timeout",
            "90s",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.timeout, Some(Duration::from_secs(90)));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), None);

        args.verbose = true;
        assert_eq!(args.log_level(), Some(tracing::Level::DEBUG));

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), Some(tracing::Level::ERROR));
    }
}
