//! Weighted aggregation of dimension scores.
//!
//! Missing dimensions are left out of both the weighted sum and the weight
//! total, so the overall score stays on a 0-100 scale however many
//! dimensions completed.

use crate::error::{Error, Result};
use crate::models::{Dimension, DimensionScore, Verdict};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-dimension weights. Each must be positive and together they must sum
/// to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    #[serde(default = "default_market")]
    pub market: f64,
    #[serde(default = "default_problem")]
    pub problem: f64,
    #[serde(default = "default_barriers")]
    pub barriers: f64,
    #[serde(default = "default_execution")]
    pub execution: f64,
    #[serde(default = "default_risks")]
    pub risks: f64,
    #[serde(default = "default_graveyard")]
    pub graveyard: f64,
}

fn default_market() -> f64 {
    0.25
}

fn default_problem() -> f64 {
    0.20
}

fn default_barriers() -> f64 {
    0.15
}

fn default_execution() -> f64 {
    0.15
}

fn default_risks() -> f64 {
    0.15
}

fn default_graveyard() -> f64 {
    0.10
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            market: default_market(),
            problem: default_problem(),
            barriers: default_barriers(),
            execution: default_execution(),
            risks: default_risks(),
            graveyard: default_graveyard(),
        }
    }
}

const WEIGHT_TOLERANCE: f64 = 1e-9;

impl Weights {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Market => self.market,
            Dimension::Problem => self.problem,
            Dimension::Barriers => self.barriers,
            Dimension::Execution => self.execution,
            Dimension::Risks => self.risks,
            Dimension::Graveyard => self.graveyard,
        }
    }

    pub fn total(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum()
    }

    pub fn validate(&self) -> Result<()> {
        for dimension in Dimension::ALL {
            let weight = self.get(dimension);
            if !weight.is_finite() || weight <= 0.0 {
                return Err(Error::Config(format!(
                    "weight for {} must be a positive number, got {}",
                    dimension.as_str(),
                    weight
                )));
            }
        }
        let total = self.total();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(Error::Config(format!(
                "dimension weights must sum to 1.0, got {}",
                total
            )));
        }
        Ok(())
    }
}

/// Combines dimension scores into one overall score.
#[derive(Debug, Clone, Default)]
pub struct ScoringAggregator {
    weights: Weights,
}

impl ScoringAggregator {
    pub fn new(weights: Weights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    /// Overall score in [0, 100], or `None` when there are no scores.
    pub fn aggregate(&self, scores: &[DimensionScore]) -> Option<u8> {
        let mut weighted = 0.0;
        let mut mass = 0.0;
        for score in scores {
            let weight = self.weights.get(score.dimension);
            weighted += weight * score.score.clamp(0.0, 100.0);
            mass += weight;
        }
        if mass <= 0.0 {
            return None;
        }

        let overall = round_half_up(weighted / mass).clamp(0.0, 100.0) as u8;
        debug!(overall, weight_mass = mass, "aggregated dimension scores");
        Some(overall)
    }

    /// Overall score and its verdict band.
    pub fn verdict(&self, scores: &[DimensionScore]) -> Option<(u8, Verdict)> {
        self.aggregate(scores)
            .map(|score| (score, Verdict::from_score(score)))
    }
}

// Snap to 1e-9 first so float drift from the division cannot turn an
// exact .5 into .4999...
fn round_half_up(value: f64) -> f64 {
    let snapped = (value * 1e9).round() / 1e9;
    (snapped + 0.5).floor()
}
