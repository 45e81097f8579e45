//! Error taxonomy for the analysis engine.
//!
//! Every variant carries owned strings so an error can be cloned and handed
//! to each caller waiting on the same cache fetch.

use crate::models::Dimension;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit wait of {wait:?} would exceed the deadline")]
    RateLimitTimeout { wait: Duration },

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Partial analysis failure, missing dimensions: {}", format_dimensions(.missing))]
    PartialAnalysisFailure { missing: Vec<Dimension> },

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Analysis not found: {0}")]
    NotFound(Uuid),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failure came from the research provider side of a query.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamTimeout(_) | Error::UpstreamError(_) | Error::RateLimitTimeout { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Cache(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Cache(format!("serialization failed: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::UpstreamTimeout(e.to_string())
        } else {
            Error::UpstreamError(e.to_string())
        }
    }
}

fn format_dimensions(dimensions: &[Dimension]) -> String {
    dimensions
        .iter()
        .map(|d| d.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message_lists_dimensions() {
        let err = Error::PartialAnalysisFailure {
            missing: vec![Dimension::Risks, Dimension::Graveyard],
        };
        assert_eq!(
            err.to_string(),
            "Partial analysis failure, missing dimensions: risks, graveyard"
        );
    }

    #[test]
    fn test_upstream_classification() {
        assert!(Error::UpstreamTimeout("slow".into()).is_upstream());
        assert!(Error::UpstreamError("500".into()).is_upstream());
        assert!(Error::RateLimitTimeout {
            wait: Duration::from_secs(1)
        }
        .is_upstream());
        assert!(!Error::Validation("bad".into()).is_upstream());
    }
}
