//! Built-in evidence analyzers.
//!
//! Each analyzer looks for supporting and contradicting phrases in the
//! evidence relevant to its dimension, weighted by evidence quality and by
//! how much the source type matters for that dimension. With little or no
//! evidence the score stays near a per-dimension baseline.

use super::DimensionAnalyzer;
use crate::error::Result;
use crate::models::{Dimension, DimensionScore, Evidence, EvidenceType, Idea};
use async_trait::async_trait;
use std::sync::Arc;

/// How far evidence can move a score away from its baseline.
const SPREAD: f64 = 40.0;

/// Total evidence weight at which a score reaches full confidence.
const FULL_CONFIDENCE_WEIGHT: f64 = 3.0;

/// Most evidence references cited by one score.
const MAX_CITATIONS: usize = 5;

struct Profile {
    baseline: f64,
    supporting: &'static [&'static str],
    contradicting: &'static [&'static str],
}

// Terms are whole words. A trailing `*` matches any word starting with the
// stem, and a plain word also matches its plural with a trailing `s`.
//
// For barriers, risks and graveyard a high score means the idea looks
// better, so phrases describing obstacles contradict.
fn profile(dimension: Dimension) -> Profile {
    match dimension {
        Dimension::Market => Profile {
            baseline: 50.0,
            supporting: &[
                "growing", "growth", "billion", "million", "demand", "expanding", "adoption",
                "market size", "cagr", "funding", "raised",
            ],
            contradicting: &[
                "declining", "shrinking", "saturated", "small market", "stagnant", "downturn",
                "niche",
            ],
        },
        Dimension::Problem => Profile {
            baseline: 50.0,
            supporting: &[
                "pain", "painful", "frustrat*", "complain*", "struggl*", "hate", "hated",
                "time-consuming", "tedious", "manual", "manually", "waste*", "expensive",
            ],
            contradicting: &[
                "already solved", "no longer", "rarely", "not a problem", "satisfied",
                "works well",
            ],
        },
        Dimension::Barriers => Profile {
            baseline: 55.0,
            supporting: &[
                "open source", "low cost", "easy to enter", "no license", "unregulated",
                "commodity",
            ],
            contradicting: &[
                "regulat*", "licens*", "compliance", "patent", "capital intensive", "incumbent",
                "dominat*", "monopol*", "certification",
            ],
        },
        Dimension::Execution => Profile {
            baseline: 55.0,
            supporting: &[
                "off-the-shelf", "api", "existing tools", "proven", "small team", "mvp",
                "quickly",
            ],
            contradicting: &[
                "complex", "complexity", "difficult", "hardware", "talent shortage",
                "years to build", "integration challenge", "technical challenge",
            ],
        },
        Dimension::Risks => Profile {
            baseline: 55.0,
            supporting: &["low risk", "stable", "insured", "compliant", "safe"],
            contradicting: &[
                "lawsuit", "liability", "liabilities", "breach", "breaches", "security", "fraud",
                "fine", "fined", "ban", "banned", "risk", "risky", "volatile", "privacy",
            ],
        },
        Dimension::Graveyard => Profile {
            baseline: 65.0,
            supporting: &["succeeded", "profitable", "acquired", "thriving", "ipo"],
            contradicting: &[
                "shut down", "shutdown", "failed", "bankrupt*", "closed", "pivot*", "post-mortem",
                "defunct", "wound down",
            ],
        },
    }
}

fn type_weight(dimension: Dimension, evidence_type: EvidenceType) -> f64 {
    use EvidenceType::*;
    match (dimension, evidence_type) {
        (Dimension::Market, Database | Professional) => 1.5,
        (Dimension::Problem, Forum) => 1.5,
        (Dimension::Barriers | Dimension::Risks, Regulatory) => 1.6,
        (Dimension::Execution, Professional | Academic) => 1.3,
        (Dimension::Graveyard, News | Database) => 1.4,
        (_, Other) => 0.6,
        _ => 1.0,
    }
}

fn word_matches(pattern: &str, word: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(stem) => word.starts_with(stem),
        None => word == pattern || word.strip_suffix('s') == Some(pattern),
    }
}

fn term_matches_at(term: &[&str], words: &[String], start: usize) -> bool {
    words.len() - start >= term.len()
        && term
            .iter()
            .zip(&words[start..])
            .all(|(pattern, word)| word_matches(pattern, word))
}

/// Count the distinct supporting and contradicting terms found in `words`.
///
/// Longer terms claim their words first, so "low risk" is not also counted
/// as "risk".
fn count_hits(words: &[String], profile: &Profile) -> (usize, usize) {
    let terms: Vec<(Vec<&str>, bool)> = profile
        .supporting
        .iter()
        .map(|t| (t, true))
        .chain(profile.contradicting.iter().map(|t| (t, false)))
        .map(|(t, supports)| (t.split([' ', '-']).collect(), supports))
        .collect();

    let mut found: Vec<(usize, usize, usize)> = Vec::new();
    for (index, (term, _)) in terms.iter().enumerate() {
        for start in 0..words.len() {
            if term_matches_at(term, words, start) {
                found.push((start, term.len(), index));
            }
        }
    }
    found.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut claimed = vec![false; words.len()];
    let mut hit = vec![false; terms.len()];
    for (start, len, index) in found {
        let span = &mut claimed[start..start + len];
        if span.iter().any(|taken| *taken) {
            continue;
        }
        span.iter_mut().for_each(|taken| *taken = true);
        hit[index] = true;
    }

    let supporting = terms.iter().zip(&hit).filter(|((_, s), h)| *s && **h).count();
    let contradicting = terms.iter().zip(&hit).filter(|((_, s), h)| !*s && **h).count();
    (supporting, contradicting)
}

/// Keyword and source-type driven analyzer for one dimension.
pub struct SignalAnalyzer {
    dimension: Dimension,
}

impl SignalAnalyzer {
    pub fn new(dimension: Dimension) -> Self {
        Self { dimension }
    }

    /// Score evidence synchronously. Deterministic for the same input.
    pub fn score(&self, evidence: &[Evidence]) -> DimensionScore {
        let profile = profile(self.dimension);

        let mut weighted: Vec<(f64, f64, &Evidence)> = Vec::new();
        for item in evidence {
            let (supporting, contradicting) = count_hits(&item.words(), &profile);
            let targeted = item.dimension == Some(self.dimension);
            if !targeted && supporting + contradicting == 0 {
                continue;
            }

            let signal = (supporting as f64 - contradicting as f64).clamp(-2.0, 2.0) / 2.0;
            let weight =
                item.quality.clamp(0.0, 1.0) * type_weight(self.dimension, item.evidence_type);
            if weight > 0.0 {
                weighted.push((weight, signal, item));
            }
        }

        if weighted.is_empty() {
            return DimensionScore {
                dimension: self.dimension,
                score: profile.baseline,
                rationale: format!(
                    "No {} evidence found; using the neutral baseline.",
                    self.dimension.as_str()
                ),
                evidence: vec![],
            };
        }

        let total_weight: f64 = weighted.iter().map(|(w, _, _)| w).sum();
        let mean_signal = weighted.iter().map(|(w, s, _)| w * s).sum::<f64>() / total_weight;
        let confidence = (total_weight / FULL_CONFIDENCE_WEIGHT).min(1.0);
        let score = (profile.baseline + SPREAD * mean_signal * confidence).clamp(0.0, 100.0);

        let supporting = weighted.iter().filter(|(_, s, _)| *s > 0.0).count();
        let contradicting = weighted.iter().filter(|(_, s, _)| *s < 0.0).count();

        // Strongest first; ties keep the curated order.
        weighted.sort_by(|a, b| {
            (b.0 * b.1.abs())
                .partial_cmp(&(a.0 * a.1.abs()))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut rationale = format!(
            "{} relevant evidence records: {} supporting, {} contradicting.",
            weighted.len(),
            supporting,
            contradicting
        );
        if let Some((_, signal, strongest)) = weighted.first() {
            if *signal != 0.0 {
                rationale.push_str(&format!(
                    " Strongest signal from {}: \"{}\"",
                    strongest.source.trim(),
                    truncate(&strongest.snippet, 120)
                ));
            }
        }

        let mut cited = Vec::new();
        for (_, _, item) in &weighted {
            let reference = item.reference();
            if !cited.contains(&reference) {
                cited.push(reference);
            }
            if cited.len() == MAX_CITATIONS {
                break;
            }
        }

        DimensionScore {
            dimension: self.dimension,
            score,
            rationale,
            evidence: cited,
        }
    }
}

#[async_trait]
impl DimensionAnalyzer for SignalAnalyzer {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    async fn analyze(&self, _idea: &Idea, evidence: &[Evidence]) -> Result<DimensionScore> {
        Ok(self.score(evidence))
    }
}

/// One built-in analyzer per dimension.
pub fn default_analyzers() -> Vec<Arc<dyn DimensionAnalyzer>> {
    Dimension::ALL
        .into_iter()
        .map(|d| Arc::new(SignalAnalyzer::new(d)) as Arc<dyn DimensionAnalyzer>)
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn evidence(
        dimension: Dimension,
        evidence_type: EvidenceType,
        snippet: &str,
        quality: f64,
    ) -> Evidence {
        Evidence {
            source: "Test".to_string(),
            evidence_type,
            url: Some(format!("https://example.com/{}", snippet.len())),
            snippet: snippet.to_string(),
            quality,
            retrieved_at: Utc::now(),
            query: "q".to_string(),
            dimension: Some(dimension),
        }
    }

    #[test]
    fn test_no_evidence_gives_baseline() {
        let score = SignalAnalyzer::new(Dimension::Market).score(&[]);
        assert_eq!(score.score, 50.0);
        assert!(score.evidence.is_empty());
        assert!(score.rationale.contains("baseline"));
    }

    #[test]
    fn test_supporting_evidence_raises_score() {
        let items = vec![
            evidence(
                Dimension::Market,
                EvidenceType::Database,
                "The market is growing at 25% CAGR, reaching $4 billion",
                0.9,
            ),
            evidence(
                Dimension::Market,
                EvidenceType::News,
                "Strong demand as startups raised record funding",
                0.8,
            ),
        ];

        let score = SignalAnalyzer::new(Dimension::Market).score(&items);

        assert!(score.score > 50.0);
        assert!(score.score <= 90.0);
        assert_eq!(score.evidence.len(), 2);
    }

    #[test]
    fn test_obstacles_lower_barrier_score() {
        let items = vec![evidence(
            Dimension::Barriers,
            EvidenceType::Regulatory,
            "Strict licensing and compliance regulation apply; incumbents dominate",
            1.0,
        )];

        let score = SignalAnalyzer::new(Dimension::Barriers).score(&items);

        assert!(score.score < 55.0);
        assert!(score.rationale.contains("1 contradicting"));
    }

    #[test]
    fn test_unrelated_untargeted_evidence_is_ignored() {
        let mut item = evidence(
            Dimension::Market,
            EvidenceType::News,
            "Weather was nice today",
            0.9,
        );
        item.dimension = Some(Dimension::Problem);

        let score = SignalAnalyzer::new(Dimension::Graveyard).score(&[item]);

        assert_eq!(score.score, 65.0);
    }

    fn hits(dimension: Dimension, snippet: &str) -> (usize, usize) {
        let item = evidence(dimension, EvidenceType::News, snippet, 1.0);
        count_hits(&item.words(), &profile(dimension))
    }

    #[test]
    fn test_terms_match_whole_words_only() {
        assert_eq!(hits(Dimension::Execution, "Needs massive capital and rapid hiring"), (0, 0));
        assert_eq!(hits(Dimension::Problem, "Whatever tool users pick in Spain"), (0, 0));
        assert_eq!(hits(Dimension::Graveyard, "Expect a tipover in the second year"), (0, 0));
        assert_eq!(hits(Dimension::Risks, "Define the urban customer first"), (0, 0));

        assert_eq!(hits(Dimension::Execution, "Public APIs exist for every step"), (1, 0));
        assert_eq!(hits(Dimension::Problem, "Users hate the painful, manual process"), (3, 0));
        assert_eq!(hits(Dimension::Risks, "Several bans and a lawsuit"), (0, 2));
    }

    #[test]
    fn test_stems_match_word_starts() {
        assert_eq!(
            hits(Dimension::Barriers, "Regulators require licensing; incumbents dominate"),
            (0, 4)
        );
        assert_eq!(hits(Dimension::Barriers, "The space is unregulated"), (1, 0));
        assert_eq!(hits(Dimension::Problem, "Teams are frustrated"), (1, 0));
    }

    #[test]
    fn test_longer_phrase_claims_contained_term() {
        assert_eq!(hits(Dimension::Risks, "Analysts call it a low risk business"), (1, 0));
        assert_eq!(hits(Dimension::Barriers, "No license needed to start"), (1, 0));
        assert_eq!(hits(Dimension::Risks, "A low risk model, but one privacy risk"), (1, 2));
    }

    #[test]
    fn test_substring_collisions_do_not_move_scores() {
        let execution = SignalAnalyzer::new(Dimension::Execution).score(&[evidence(
            Dimension::Execution,
            EvidenceType::News,
            "Needs massive capital and rapid hiring",
            1.0,
        )]);
        assert_eq!(execution.score, 55.0);
        assert!(execution.rationale.contains("0 supporting, 0 contradicting"));

        let risks = SignalAnalyzer::new(Dimension::Risks).score(&[evidence(
            Dimension::Risks,
            EvidenceType::News,
            "Analysts call it a low risk business",
            1.0,
        )]);
        assert!(risks.score > 55.0);
        assert!(risks.rationale.contains("1 supporting"));

        let problem = SignalAnalyzer::new(Dimension::Problem).score(&[evidence(
            Dimension::Problem,
            EvidenceType::Forum,
            "Whatever tool users pick in Spain, it works well",
            1.0,
        )]);
        assert!(problem.score < 50.0);
        assert!(problem.rationale.contains("1 contradicting"));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let items = vec![
            evidence(Dimension::Risks, EvidenceType::News, "Privacy lawsuit filed", 0.7),
            evidence(Dimension::Risks, EvidenceType::Regulatory, "Stable and compliant", 0.6),
        ];
        let analyzer = SignalAnalyzer::new(Dimension::Risks);
        assert_eq!(analyzer.score(&items), analyzer.score(&items));
    }

    #[test]
    fn test_default_analyzers_cover_every_dimension() {
        let dims: Vec<_> = default_analyzers().iter().map(|a| a.dimension()).collect();
        assert_eq!(dims, Dimension::ALL.to_vec());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij klm", 10), "abcdefghij...");
    }
}
