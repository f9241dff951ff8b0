//! Risk scorer — folds triggered signals into a bounded score and level.
//!
//! Pure computation: rules, detectors and the velocity check each contribute
//! `Signal`s; the scorer sums weights, clamps to [0, 100] and maps the fixed
//! level tiers. Recommendations are advisory only and never affect the
//! decision gate.

use serde::{Deserialize, Serialize};

/// One triggered factor and its weight contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Fixed tiers, independent of merchant configuration.
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            40..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0–100 inclusive, clamped.
    pub score: u32,
    pub level: RiskLevel,
    /// Triggered rule/detector names, in evaluation order.
    pub factors: Vec<String>,
    /// Advisory text keyed to level. Never drives the action.
    pub recommendations: Vec<String>,
}

/// Aggregate triggered signals into the final assessment.
pub fn assess(signals: &[Signal]) -> RiskAssessment {
    let raw: u32 = signals.iter().map(|s| s.weight).sum();
    let score = raw.min(100);
    let level = RiskLevel::from_score(score);

    RiskAssessment {
        score,
        level,
        factors: signals.iter().map(|s| s.name.clone()).collect(),
        recommendations: recommendations_for(level),
    }
}

fn recommendations_for(level: RiskLevel) -> Vec<String> {
    let texts: &[&str] = match level {
        RiskLevel::Critical => &[
            "block immediately",
            "review customer account for related activity",
        ],
        RiskLevel::High => &["hold for manual review before capture"],
        RiskLevel::Medium => &["monitor subsequent activity for this customer"],
        RiskLevel::Low => &[],
    };
    texts.iter().map(|t| t.to_string()).collect()
}
