//! Markdown and JSON report generation.
//!
//! Renders a finished analysis: verdict, per-dimension scores with their
//! rationale, and the curated evidence the scores cite.

use anyhow::Result;
use realitycheck::models::{Analysis, AnalysisStatus, Dimension, DimensionScore, Evidence};
use std::collections::HashMap;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(analysis: &Analysis) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "# RealityCheck: {}\n\n",
        analysis.request.idea.title.trim()
    ));
    output.push_str(&format!("> {}\n\n", analysis.request.idea.one_liner.trim()));

    output.push_str(&generate_verdict_section(analysis));
    output.push_str(&generate_metadata_section(analysis));

    if analysis.status == AnalysisStatus::Failed {
        output.push_str(&generate_failure_section(analysis));
    }

    if !analysis.scores.is_empty() {
        output.push_str(&generate_scores_section(analysis));
        output.push_str(&generate_details_section(analysis));
    }

    output.push_str(&generate_evidence_section(&analysis.evidence));
    output.push_str(&generate_footer());

    output
}

/// Generate the verdict section.
fn generate_verdict_section(analysis: &Analysis) -> String {
    let mut section = String::new();

    section.push_str("## Verdict\n\n");
    match (analysis.overall_score, analysis.verdict) {
        (Some(score), Some(verdict)) => {
            section.push_str(&format!(
                "{} **{}**, overall score **{}/100**\n\n",
                verdict.emoji(),
                verdict,
                score
            ));
        }
        _ => section.push_str("No overall score was produced.\n\n"),
    }

    if analysis.is_partial() && analysis.status == AnalysisStatus::Completed {
        let missing: Vec<_> = analysis
            .missing_dimensions
            .iter()
            .map(|d| d.to_string())
            .collect();
        section.push_str(&format!(
            "⚠️ Partial analysis: {} of 6 dimensions scored. Missing: {}. \
             The overall score is weighted over the scored dimensions only.\n\n",
            analysis.scores.len(),
            missing.join(", ")
        ));
    }

    section
}

/// Generate the metadata section.
fn generate_metadata_section(analysis: &Analysis) -> String {
    let mut section = String::new();
    let idea = &analysis.request.idea;

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Analysis ID:** `{}`\n", analysis.id));
    section.push_str(&format!("- **Status:** {}\n", analysis.status));
    if let Some(ref category) = idea.category {
        section.push_str(&format!("- **Category:** {}\n", category));
    }
    if let Some(location) = analysis.request.effective_location() {
        section.push_str(&format!("- **Location:** {}\n", location));
    }
    section.push_str(&format!(
        "- **Started:** {}\n",
        analysis.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        analysis.stats.elapsed_ms as f64 / 1000.0
    ));
    section.push_str(&format!(
        "- **Research Queries:** {} planned, {} failed",
        analysis.stats.queries_planned, analysis.stats.queries_failed
    ));
    if analysis.stats.queries_abandoned > 0 {
        section.push_str(&format!(
            ", {} unanswered at the deadline",
            analysis.stats.queries_abandoned
        ));
    }
    section.push('\n');
    section.push_str(&format!(
        "- **Evidence:** {} gathered, {} kept\n\n",
        analysis.stats.evidence_raw, analysis.stats.evidence_kept
    ));

    section
}

/// Generate the failure section.
fn generate_failure_section(analysis: &Analysis) -> String {
    let mut section = String::new();

    section.push_str("## Failure\n\n");
    section.push_str(&format!(
        "❌ {}\n\n",
        analysis.error.as_deref().unwrap_or("The analysis failed.")
    ));

    section
}

/// Generate the dimension score table.
fn generate_scores_section(analysis: &Analysis) -> String {
    let mut section = String::new();

    section.push_str("## Dimension Scores\n\n");
    section.push_str("| Dimension | Score |\n");
    section.push_str("|:---|:---:|\n");

    for dimension in Dimension::ALL {
        match analysis.scores.iter().find(|s| s.dimension == dimension) {
            Some(score) => {
                section.push_str(&format!("| {} | {:.0} |\n", dimension, score.score));
            }
            None => section.push_str(&format!("| {} | n/a |\n", dimension)),
        }
    }
    section.push('\n');

    section
}

/// Generate one block per scored dimension.
fn generate_details_section(analysis: &Analysis) -> String {
    let mut section = String::new();
    let numbering = evidence_numbering(&analysis.evidence);

    section.push_str("## Details\n\n");
    for score in &analysis.scores {
        section.push_str(&generate_dimension_block(score, &numbering));
    }

    section
}

fn generate_dimension_block(score: &DimensionScore, numbering: &HashMap<String, usize>) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {} ({:.0})\n\n", score.dimension, score.score));
    block.push_str(&format!("{}\n\n", score.rationale));

    if !score.evidence.is_empty() {
        let cited: Vec<String> = score
            .evidence
            .iter()
            .map(|reference| match numbering.get(reference) {
                Some(n) => format!("[{}]", n),
                None => format!("`{}`", reference),
            })
            .collect();
        block.push_str(&format!("**Evidence:** {}\n\n", cited.join(", ")));
    }

    block
}

/// Generate the numbered evidence list.
fn generate_evidence_section(evidence: &[Evidence]) -> String {
    let mut section = String::new();

    section.push_str("## Evidence\n\n");
    if evidence.is_empty() {
        section.push_str("No evidence was gathered.\n\n");
        return section;
    }

    for (i, item) in evidence.iter().enumerate() {
        let source = match item.url {
            Some(ref url) => format!("[{}]({})", item.source.trim(), url),
            None => item.source.trim().to_string(),
        };
        section.push_str(&format!(
            "{}. **{}** ({}, quality {:.2}): {}\n",
            i + 1,
            source,
            item.evidence_type,
            item.quality,
            item.snippet.trim()
        ));
    }
    section.push('\n');

    section
}

fn evidence_numbering(evidence: &[Evidence]) -> HashMap<String, usize> {
    let mut numbering = HashMap::new();
    for (i, item) in evidence.iter().enumerate() {
        numbering.entry(item.reference()).or_insert(i + 1);
    }
    numbering
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by RealityCheck v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(analysis: &Analysis) -> Result<String> {
    serde_json::to_string_pretty(analysis).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use realitycheck::models::{AnalysisRequest, EvidenceType, Idea, Verdict};

    fn create_test_analysis() -> Analysis {
        let mut analysis = Analysis::new(AnalysisRequest::new(
            Idea::new("Loom", "Agentic coding assistant").with_category("developer tools"),
        ));
        analysis.evidence = vec![Evidence {
            source: "Example Research".to_string(),
            evidence_type: EvidenceType::Professional,
            url: Some("https://example.com/report".to_string()),
            snippet: "AI coding tools market is growing fast".to_string(),
            quality: 0.9,
            retrieved_at: Utc::now(),
            query: "coding market".to_string(),
            dimension: Some(Dimension::Market),
        }];
        for dimension in Dimension::ALL {
            if dimension == Dimension::Risks {
                continue;
            }
            analysis
                .record_score(DimensionScore {
                    dimension,
                    score: 70.0,
                    rationale: format!("{} rationale", dimension),
                    evidence: vec!["https://example.com/report".to_string()],
                })
                .unwrap();
        }
        analysis.missing_dimensions = vec![Dimension::Risks];
        analysis.overall_score = Some(70);
        analysis.verdict = Some(Verdict::Promising);
        analysis.advance(AnalysisStatus::Completed).unwrap();
        analysis
    }

    #[test]
    fn test_generate_markdown_report() {
        let analysis = create_test_analysis();
        let markdown = generate_markdown_report(&analysis);

        assert!(markdown.contains("# RealityCheck: Loom"));
        assert!(markdown.contains("## Verdict"));
        assert!(markdown.contains("**Promising**"));
        assert!(markdown.contains("70/100"));
        assert!(markdown.contains("## Dimension Scores"));
        assert!(markdown.contains("| Risks | n/a |"));
        assert!(markdown.contains("Missing: Risks"));
        assert!(markdown.contains("**Evidence:** [1]"));
        assert!(markdown.contains("developer tools"));
    }

    #[test]
    fn test_failed_analysis_report() {
        let mut analysis = Analysis::new(AnalysisRequest::new(Idea::new("Loom", "pitch")));
        analysis.fail("no dimension produced a score").unwrap();

        let markdown = generate_markdown_report(&analysis);

        assert!(markdown.contains("## Failure"));
        assert!(markdown.contains("no dimension produced a score"));
        assert!(markdown.contains("No overall score"));
        assert!(!markdown.contains("## Dimension Scores"));
        assert!(markdown.contains("No evidence was gathered"));
    }

    #[test]
    fn test_generate_json_report() {
        let analysis = create_test_analysis();
        let json = generate_json_report(&analysis).unwrap();

        assert!(json.contains("\"overall_score\": 70"));
        assert!(json.contains("\"missing_dimensions\""));
        assert!(json.contains("\"risks\""));
        assert!(json.contains("\"status\": \"completed\""));
    }
}
