//! Decision gate — maps a risk score to an action via merchant thresholds.
//!
//! Each threshold is compared independently, block first. A misconfigured
//! merchant (say `flag_threshold > block_threshold`) therefore still gets
//! well-defined precedence: block wins whenever the score reaches
//! `block_threshold`, regardless of how the other two are ranked.

use crate::config::MerchantFraudSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Allow,
    Flag,
    Review,
    Block,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Allow => "allow",
            GateAction::Flag => "flag",
            GateAction::Review => "review",
            GateAction::Block => "block",
        }
    }

    /// Severity rank, for monotonicity checks. Higher is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            GateAction::Allow => 0,
            GateAction::Flag => 1,
            GateAction::Review => 2,
            GateAction::Block => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: GateAction,
    pub reason: Option<String>,
}

/// Map a score to an action. Pure; the caller performs the review-case
/// side effect.
pub fn decide(settings: &MerchantFraudSettings, score: u32) -> Decision {
    // Gate disabled: always allow. The score was still computed upstream
    // and persisted for observability.
    if !settings.enabled {
        return Decision {
            action: GateAction::Allow,
            reason: None,
        };
    }

    if score >= settings.block_threshold {
        return Decision {
            action: GateAction::Block,
            reason: Some("High risk score detected".to_string()),
        };
    }
    if score >= settings.review_threshold {
        return Decision {
            action: GateAction::Review,
            reason: Some("Suspicious activity detected".to_string()),
        };
    }
    if score >= settings.flag_threshold {
        return Decision {
            action: GateAction::Flag,
            reason: Some("Moderate risk detected".to_string()),
        };
    }
    Decision {
        action: GateAction::Allow,
        reason: None,
    }
}
