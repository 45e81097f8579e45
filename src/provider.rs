//! External research provider.
//!
//! `ResearchProvider` is the seam the gatherer calls through. The bundled
//! implementation asks an OpenAI-compatible chat completions endpoint for
//! evidence records, one JSON object per line.

use crate::error::{Error, Result};
use crate::models::{Evidence, EvidenceType};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

/// Source of raw evidence for a research query.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Run one query. Implementations must give up by `deadline`, failing
    /// with `UpstreamTimeout`; other transport failures are `UpstreamError`.
    async fn query(
        &self,
        query: &str,
        location: Option<&str>,
        deadline: Instant,
    ) -> Result<Vec<Evidence>>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "research"
    }
}

/// Connection settings for the LLM research provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    /// Evidence records requested per query.
    pub max_results: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_results: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Research provider backed by an OpenAI-compatible chat API.
pub struct LlmResearchProvider {
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl LlmResearchProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(Error::Config(
                "provider URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        info!(
            "Research provider: model {} at {}",
            config.model, config.base_url
        );

        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_prompt(&self, query: &str, location: Option<&str>) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("Research query: {}\n", query));
        if let Some(location) = location {
            prompt.push_str(&format!("Focus on: {}\n", location));
        }
        prompt.push_str(&format!(
            "\nReturn up to {} evidence records, one JSON object per line, in this exact format:\n",
            self.config.max_results
        ));
        prompt.push_str(r#"{"source": "Publisher", "type": "news", "url": "https://...", "snippet": "Relevant excerpt", "quality": 0.8}"#);
        prompt.push_str("\n\nAllowed types: news, database, regulatory, forum, professional, academic, other.\n");
        prompt.push_str("Quality is your confidence in the record between 0 and 1. Only output JSON, no other text.");
        prompt
    }
}

#[async_trait]
impl ResearchProvider for LlmResearchProvider {
    async fn query(
        &self,
        query: &str,
        location: Option<&str>,
        deadline: Instant,
    ) -> Result<Vec<Evidence>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::UpstreamTimeout(format!(
                "no time left for query '{}'",
                query
            )));
        }

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: RESEARCH_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: self.build_prompt(query, location),
                },
            ],
            temperature: self.config.temperature,
            stream: false,
        };

        debug!(query, timeout_ms = remaining.as_millis() as u64, "sending research query");

        let mut builder = self.http_client.post(&url).timeout(remaining).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::UpstreamTimeout(format!(
                    "research query timed out after {:.1}s",
                    remaining.as_secs_f64()
                ))
            } else if e.is_connect() {
                Error::UpstreamError(format!(
                    "cannot connect to research provider at {}",
                    self.config.base_url
                ))
            } else {
                Error::UpstreamError(format!("failed to send request: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamError(format!(
                "research provider error {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            Error::UpstreamError(format!("failed to parse provider response: {}", e))
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let evidence = parse_evidence(&content, query);
        debug!(query, records = evidence.len(), "parsed research response");
        Ok(evidence)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// Parse evidence records from a model response.
///
/// Accepts one JSON object per line or a single JSON array. Lines that are
/// not JSON objects, and records without a snippet, are skipped.
pub fn parse_evidence(content: &str, query: &str) -> Vec<Evidence> {
    let trimmed = content.trim();

    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<Value>>(trimmed).unwrap_or_default()
    } else {
        trimmed
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .filter_map(|line| serde_json::from_str::<Value>(line.trim_end_matches(',')).ok())
            .collect()
    };

    values
        .iter()
        .filter_map(|json| json_to_evidence(json, query))
        .collect()
}

fn json_to_evidence(json: &Value, query: &str) -> Option<Evidence> {
    let snippet = json["snippet"].as_str()?.trim();
    if snippet.is_empty() {
        return None;
    }

    let quality = json["quality"]
        .as_f64()
        .filter(|q| q.is_finite())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    Some(Evidence {
        source: json["source"].as_str().unwrap_or("unknown").to_string(),
        evidence_type: EvidenceType::from(json["type"].as_str().unwrap_or("other")),
        url: json["url"]
            .as_str()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from),
        snippet: snippet.to_string(),
        quality,
        retrieved_at: Utc::now(),
        query: query.to_string(),
        dimension: None,
    })
}

/// System prompt for research queries
const RESEARCH_SYSTEM_PROMPT: &str = r#"You are a meticulous startup market researcher.
For each query, report concrete, verifiable evidence: market figures, regulations,
user complaints, competitor activity and failed prior attempts.
Output each evidence record as a JSON object on its own line.
Only output valid JSON, no explanations or markdown."#;
