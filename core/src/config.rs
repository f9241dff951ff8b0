//! Engine configuration.
//!
//! Two kinds of settings live here:
//!   - `MerchantFraudSettings`: per-merchant gate thresholds. Persisted in the
//!     store and fetched fresh on every evaluation — never cached in-process.
//!   - `EngineConfig` / `DetectorConfig`: merchant-agnostic engine defaults
//!     (detector windows, weights, failure policy, rule descriptors),
//!     loadable from a JSON file at startup.

use crate::{
    error::{EngineError, EngineResult},
    rules::RuleDescriptor,
    types::MerchantId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-merchant decision-gate settings.
///
/// The expected ordering is `block >= review >= flag`, but the gate never
/// assumes the operator configured them that way — see `gate::decide`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantFraudSettings {
    pub merchant_id: MerchantId,
    pub enabled: bool,
    pub block_threshold: u32,
    pub review_threshold: u32,
    pub flag_threshold: u32,
}

impl MerchantFraudSettings {
    pub fn with_defaults(merchant_id: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            enabled: true,
            block_threshold: 80,
            review_threshold: 60,
            flag_threshold: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Fixed counting window, in seconds.
    pub window_secs: i64,
    /// Counts above this trigger the velocity factor.
    pub threshold: i64,
    pub weight: u32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            threshold: 5,
            weight: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountAnomalyConfig {
    /// Trailing window over successful merchant transactions.
    pub window_hours: i64,
    /// Triggered when `amount > avg * avg_multiplier`.
    pub avg_multiplier: f64,
    /// Triggered when `amount > max * max_multiplier`.
    pub max_multiplier: f64,
    pub weight: u32,
}

impl Default for AmountAnomalyConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            avg_multiplier: 3.0,
            max_multiplier: 1.5,
            weight: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoAnomalyConfig {
    pub window_hours: i64,
    /// Triggered when the distinct recent location count exceeds this.
    pub max_distinct_locations: i64,
    pub weight: u32,
}

impl Default for GeoAnomalyConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            max_distinct_locations: 2,
            weight: 20,
        }
    }
}

/// What to do when a detector's historical query fails or times out.
///
/// `Open` (the default) treats the detector as not triggered and logs a
/// warning: availability over strictness. `Closed` adds a single bounded
/// score bump instead, so an attacker cannot buy a clean score by taking
/// the history store down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DetectorFailurePolicy {
    Open,
    Closed { score_bump: u32 },
}

impl Default for DetectorFailurePolicy {
    fn default() -> Self {
        DetectorFailurePolicy::Open
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectorConfig {
    pub velocity: VelocityConfig,
    pub amount: AmountAnomalyConfig,
    pub geo: GeoAnomalyConfig,
    pub failure_policy: DetectorFailurePolicy,
    /// Fan-in deadline for the detector reads, in milliseconds.
    pub timeout_ms: u64,
}

impl DetectorConfig {
    pub fn timeout_ms_or_default(&self) -> u64 {
        if self.timeout_ms == 0 {
            500
        } else {
            self.timeout_ms
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detectors: DetectorConfig,
    pub rules: Vec<RuleDescriptor>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detectors: DetectorConfig::default(),
            rules: crate::rules::default_rules(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid engine config: {e}")))
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}
