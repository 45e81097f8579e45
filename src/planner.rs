//! Search planning: turning an idea into targeted research queries.
//!
//! Planning is template based and fully deterministic. Templates are taken
//! round-robin across dimensions in canonical order, so any plan with at
//! least six queries covers every dimension.

use crate::models::{AnalysisRequest, Dimension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Upper bound on planned queries when none is configured.
pub const DEFAULT_MAX_QUERIES: usize = 20;

/// A research query aimed at one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub dimension: Dimension,
    pub text: String,
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.dimension.as_str(), self.text)
    }
}

// Placeholders: {pitch}, {title}, {category}, {in_location}
fn templates(dimension: Dimension) -> &'static [&'static str] {
    match dimension {
        Dimension::Market => &[
            "{pitch} market size",
            "{category} market growth trends{in_location}",
            "{pitch} customer demand and willingness to pay",
        ],
        Dimension::Problem => &[
            "{pitch} pain points",
            "problems with existing {category} tools",
            "{pitch} user complaints forum",
        ],
        Dimension::Barriers => &[
            "{category} regulation and licensing{in_location}",
            "{pitch} barriers to entry",
            "{category} incumbents and competitors",
        ],
        Dimension::Execution => &[
            "building {pitch} technical challenges",
            "{category} startup costs and team requirements",
            "{pitch} go-to-market strategy",
        ],
        Dimension::Risks => &[
            "{pitch} legal and compliance risks{in_location}",
            "{category} market risks",
            "{pitch} liability and security concerns",
        ],
        Dimension::Graveyard => &[
            "{title} startup shut down",
            "failed {category} startups post-mortem",
            "{pitch} pivot or failure lessons",
        ],
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Builds search plans bounded by a maximum query count.
#[derive(Debug, Clone)]
pub struct SearchPlanner {
    max_queries: usize,
}

impl Default for SearchPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUERIES)
    }
}

impl SearchPlanner {
    pub fn new(max_queries: usize) -> Self {
        Self { max_queries }
    }

    pub fn max_queries(&self) -> usize {
        self.max_queries
    }

    /// Plan queries for a request. The result may be empty.
    pub fn plan(&self, request: &AnalysisRequest) -> Vec<SearchQuery> {
        let idea = &request.idea;
        let pitch = collapse(idea.one_liner.trim_end_matches(['.', '!', '?']));
        let title = collapse(&idea.title);
        let category = idea
            .category
            .as_deref()
            .map(collapse)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| pitch.clone());
        let in_location = request
            .effective_location()
            .map(|l| format!(" in {}", collapse(l)))
            .unwrap_or_default();

        let render = |template: &str| {
            collapse(
                &template
                    .replace("{pitch}", &pitch)
                    .replace("{title}", &title)
                    .replace("{category}", &category)
                    .replace("{in_location}", &in_location),
            )
        };

        let rounds = Dimension::ALL
            .iter()
            .map(|d| templates(*d).len())
            .max()
            .unwrap_or(0);

        let mut seen = HashSet::new();
        let mut plan = Vec::new();

        'rounds: for round in 0..rounds {
            for dimension in Dimension::ALL {
                if plan.len() >= self.max_queries {
                    break 'rounds;
                }
                let Some(template) = templates(dimension).get(round) else {
                    continue;
                };
                let text = render(template);
                if text.is_empty() || !seen.insert(text.to_lowercase()) {
                    continue;
                }
                plan.push(SearchQuery { dimension, text });
            }
        }

        debug!(
            queries = plan.len(),
            max = self.max_queries,
            "planned research queries"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisOptions, Idea};

    fn loom() -> AnalysisRequest {
        AnalysisRequest::new(Idea::new("Loom", "Agentic coding assistant"))
    }

    #[test]
    fn test_six_queries_cover_every_dimension() {
        let plan = SearchPlanner::new(6).plan(&loom());

        assert_eq!(plan.len(), 6);
        let dimensions: Vec<_> = plan.iter().map(|q| q.dimension).collect();
        assert_eq!(dimensions, Dimension::ALL.to_vec());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = SearchPlanner::new(20);
        assert_eq!(planner.plan(&loom()), planner.plan(&loom()));
    }

    #[test]
    fn test_plan_is_bounded() {
        assert_eq!(SearchPlanner::new(3).plan(&loom()).len(), 3);
        assert!(SearchPlanner::new(100).plan(&loom()).len() <= 18);
        assert!(SearchPlanner::new(0).plan(&loom()).is_empty());
    }

    #[test]
    fn test_category_and_location_bias_phrasing() {
        let request = AnalysisRequest::new(
            Idea::new("Loom", "Agentic coding assistant.").with_category("developer tools"),
        )
        .with_options(AnalysisOptions {
            location_bias: Some("Germany".to_string()),
            ..AnalysisOptions::default()
        });

        let plan = SearchPlanner::new(20).plan(&request);
        let texts: Vec<_> = plan.iter().map(|q| q.text.as_str()).collect();

        assert!(texts.contains(&"developer tools market growth trends in Germany"));
        assert!(texts.contains(&"Agentic coding assistant market size"));
        assert!(texts.contains(&"Loom startup shut down"));
    }

    #[test]
    fn test_plan_has_no_duplicate_queries() {
        let plan = SearchPlanner::new(100).plan(&loom());
        let unique: HashSet<_> = plan.iter().map(|q| q.text.to_lowercase()).collect();
        assert_eq!(unique.len(), plan.len());
    }
}
