//! Data models for the analysis engine.
//!
//! This module contains the core data structures that flow through the
//! pipeline: the submitted idea, the evidence gathered for it, and the
//! analysis record that accumulates dimension scores.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest accepted idea title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Longest accepted one-line pitch, in characters.
pub const MAX_PITCH_CHARS: usize = 500;

/// One of the six analytical axes an idea is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Size and growth of the addressable market
    Market,
    /// How painful and widespread the underlying problem is
    Problem,
    /// Regulatory, capital and incumbent barriers to entry
    Barriers,
    /// How hard the idea is to build and deliver
    Execution,
    /// Legal, market and operational risks
    Risks,
    /// Prior attempts at the same idea that failed
    Graveyard,
}

impl Dimension {
    /// All dimensions in canonical output order.
    pub const ALL: [Dimension; 6] = [
        Dimension::Market,
        Dimension::Problem,
        Dimension::Barriers,
        Dimension::Execution,
        Dimension::Risks,
        Dimension::Graveyard,
    ];

    /// Stable lowercase name, as used in serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Market => "market",
            Dimension::Problem => "problem",
            Dimension::Barriers => "barriers",
            Dimension::Execution => "execution",
            Dimension::Risks => "risks",
            Dimension::Graveyard => "graveyard",
        }
    }

    /// Position in the canonical order.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Market => write!(f, "Market"),
            Dimension::Problem => write!(f, "Problem"),
            Dimension::Barriers => write!(f, "Barriers"),
            Dimension::Execution => write!(f, "Execution"),
            Dimension::Risks => write!(f, "Risks"),
            Dimension::Graveyard => write!(f, "Graveyard"),
        }
    }
}

/// Kind of source a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    News,
    Database,
    Regulatory,
    Forum,
    Professional,
    Academic,
    Other,
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceType::News => write!(f, "News"),
            EvidenceType::Database => write!(f, "Database"),
            EvidenceType::Regulatory => write!(f, "Regulatory"),
            EvidenceType::Forum => write!(f, "Forum"),
            EvidenceType::Professional => write!(f, "Professional"),
            EvidenceType::Academic => write!(f, "Academic"),
            EvidenceType::Other => write!(f, "Other"),
        }
    }
}

impl From<&str> for EvidenceType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "news" | "press" | "article" | "blog" => EvidenceType::News,
            "database" | "db" | "dataset" | "crunchbase" | "statistics" | "stats" => {
                EvidenceType::Database
            }
            "regulatory" | "regulation" | "legal" | "gov" | "government" | "law" => {
                EvidenceType::Regulatory
            }
            "forum" | "reddit" | "community" | "hn" | "hackernews" | "discussion" => {
                EvidenceType::Forum
            }
            "professional" | "industry" | "report" | "analyst" | "linkedin" => {
                EvidenceType::Professional
            }
            "academic" | "paper" | "journal" | "research" | "study" => EvidenceType::Academic,
            _ => EvidenceType::Other,
        }
    }
}

/// The startup concept under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub title: String,
    pub one_liner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Idea {
    pub fn new(title: impl Into<String>, one_liner: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            one_liner: one_liner.into(),
            category: None,
            location: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Per-request evidence options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Upper bound on curated evidence kept for the whole analysis.
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,
    /// Upper bound on curated evidence kept per originating query.
    #[serde(default = "default_per_query_cap")]
    pub per_query_cap: usize,
    /// Location used to bias queries and cache keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_bias: Option<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_evidence: default_max_evidence(),
            per_query_cap: default_per_query_cap(),
            location_bias: None,
        }
    }
}

fn default_max_evidence() -> usize {
    60
}

fn default_per_query_cap() -> usize {
    10
}

/// An idea plus its options, as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub idea: Idea,
    #[serde(default)]
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    pub fn new(idea: Idea) -> Self {
        Self {
            idea,
            options: AnalysisOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    /// Location that biases the search: explicit option first, then the idea's own.
    pub fn effective_location(&self) -> Option<&str> {
        self.options
            .location_bias
            .as_deref()
            .or(self.idea.location.as_deref())
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    /// Check that the request is well formed.
    pub fn validate(&self) -> Result<()> {
        let title = self.idea.title.trim();
        if title.is_empty() {
            return Err(Error::Validation("idea title must not be empty".to_string()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(Error::Validation(format!(
                "idea title exceeds {} characters",
                MAX_TITLE_CHARS
            )));
        }

        let pitch = self.idea.one_liner.trim();
        if pitch.is_empty() {
            return Err(Error::Validation(
                "idea one-liner must not be empty".to_string(),
            ));
        }
        if pitch.chars().count() > MAX_PITCH_CHARS {
            return Err(Error::Validation(format!(
                "idea one-liner exceeds {} characters",
                MAX_PITCH_CHARS
            )));
        }

        if self.options.max_evidence == 0 {
            return Err(Error::Validation(
                "max evidence must be at least 1".to_string(),
            ));
        }
        if self.options.per_query_cap == 0 {
            return Err(Error::Validation(
                "per-query evidence cap must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// A single piece of retrieved research material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Publisher or site the material came from.
    pub source: String,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub snippet: String,
    /// Quality score in [0, 1].
    pub quality: f64,
    pub retrieved_at: DateTime<Utc>,
    /// Query text this evidence was gathered for.
    #[serde(default)]
    pub query: String,
    /// Dimension the originating query targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,
}

impl Evidence {
    /// Stable reference used when a dimension score cites this evidence.
    pub fn reference(&self) -> String {
        match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => {
                let fingerprint = crate::normalizer::snippet_fingerprint(&self.snippet);
                format!("snippet:{}", &fingerprint[..12])
            }
        }
    }

    /// Lowercased words of the snippet, split on anything that is not
    /// alphanumeric. Used for keyword matching.
    pub fn words(&self) -> Vec<String> {
        self.snippet
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

/// Score produced by one analyzer for one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    /// Score in [0, 100].
    pub score: f64,
    pub rationale: String,
    /// References of the evidence the score relied on.
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Lifecycle state of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Gathering,
    Analyzing,
    Scoring,
    Completed,
    Failed,
}

impl AnalysisStatus {
    fn rank(&self) -> u8 {
        match self {
            AnalysisStatus::Pending => 0,
            AnalysisStatus::Gathering => 1,
            AnalysisStatus::Analyzing => 2,
            AnalysisStatus::Scoring => 3,
            AnalysisStatus::Completed | AnalysisStatus::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle moving forward.
    pub fn can_advance_to(&self, next: AnalysisStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            AnalysisStatus::Failed => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Gathering => "gathering",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Scoring => "scoring",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Overall judgement band derived from the weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Strong,
    Promising,
    Risky,
    Weak,
}

impl Verdict {
    pub fn from_score(score: u8) -> Self {
        match score {
            75..=u8::MAX => Verdict::Strong,
            55..=74 => Verdict::Promising,
            35..=54 => Verdict::Risky,
            _ => Verdict::Weak,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Verdict::Strong => "🟢",
            Verdict::Promising => "🟡",
            Verdict::Risky => "🟠",
            Verdict::Weak => "🔴",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Strong => write!(f, "Strong"),
            Verdict::Promising => write!(f, "Promising"),
            Verdict::Risky => write!(f, "Risky"),
            Verdict::Weak => write!(f, "Weak"),
        }
    }
}

/// Counters describing how an analysis run went.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub queries_planned: usize,
    pub queries_failed: usize,
    /// Queries whose results did not arrive before the deadline.
    pub queries_abandoned: usize,
    pub evidence_raw: usize,
    pub evidence_kept: usize,
    pub elapsed_ms: u64,
}

/// The analysis record for one submitted idea.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub request: AnalysisRequest,
    pub status: AnalysisStatus,
    /// Dimension scores in canonical order, one per dimension at most.
    pub scores: Vec<DimensionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Dimensions whose analyzer did not produce a score.
    #[serde(default)]
    pub missing_dimensions: Vec<Dimension>,
    /// Curated evidence the scores were computed from.
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub stats: AnalysisStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Analysis {
    /// Creates a pending analysis for the request.
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            status: AnalysisStatus::Pending,
            scores: Vec::new(),
            overall_score: None,
            verdict: None,
            missing_dimensions: Vec::new(),
            evidence: Vec::new(),
            stats: AnalysisStats::default(),
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move the lifecycle forward. Backward moves and moves out of a
    /// terminal state are rejected.
    pub fn advance(&mut self, next: AnalysisStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::AnalysisFailed(format!(
                "illegal status transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a dimension score, keeping canonical order and rejecting duplicates.
    pub fn record_score(&mut self, score: DimensionScore) -> Result<()> {
        if self.scores.iter().any(|s| s.dimension == score.dimension) {
            return Err(Error::AnalysisFailed(format!(
                "duplicate score for dimension {}",
                score.dimension.as_str()
            )));
        }
        self.scores.push(score);
        self.scores.sort_by_key(|s| s.dimension.index());
        Ok(())
    }

    /// Mark the analysis failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.error = Some(reason.into());
        self.advance(AnalysisStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether some dimensions were not scored.
    pub fn is_partial(&self) -> bool {
        !self.missing_dimensions.is_empty()
    }
}
