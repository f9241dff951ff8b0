//! Aggregate fraud statistics for the reporting surface.

use crate::{error::EngineResult, store::EngineStore, types::MerchantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TOP_FACTOR_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantFraudStats {
    pub merchant_id: MerchantId,
    pub total_evaluated: i64,
    pub allowed: i64,
    pub flagged: i64,
    pub reviewed: i64,
    pub blocked: i64,
    pub avg_risk_score: f64,
    pub top_factors: Vec<FactorCount>,
}

/// Counts of gate outcomes, average risk score and the most frequently
/// triggered factors over a date range.
pub fn merchant_stats(
    store: &EngineStore,
    merchant_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> EngineResult<MerchantFraudStats> {
    let rows = store.decision_rows(merchant_id, from.timestamp_millis(), to.timestamp_millis())?;

    let mut stats = MerchantFraudStats {
        merchant_id: merchant_id.to_string(),
        total_evaluated: 0,
        allowed: 0,
        flagged: 0,
        reviewed: 0,
        blocked: 0,
        avg_risk_score: 0.0,
        top_factors: Vec::new(),
    };

    let mut score_sum: i64 = 0;
    let mut factor_counts: HashMap<String, i64> = HashMap::new();

    for row in &rows {
        stats.total_evaluated += 1;
        match row.decision.as_deref() {
            Some("allow") => stats.allowed += 1,
            Some("flag") => stats.flagged += 1,
            Some("review") => stats.reviewed += 1,
            Some("block") => stats.blocked += 1,
            _ => {}
        }
        score_sum += row.fraud_score.unwrap_or(0);

        if let Some(json) = row.fraud_factors.as_deref() {
            if let Ok(factors) = serde_json::from_str::<Vec<String>>(json) {
                for factor in factors {
                    *factor_counts.entry(factor).or_insert(0) += 1;
                }
            }
        }
    }

    if stats.total_evaluated > 0 {
        stats.avg_risk_score = score_sum as f64 / stats.total_evaluated as f64;
    }

    let mut counts: Vec<FactorCount> = factor_counts
        .into_iter()
        .map(|(name, count)| FactorCount { name, count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    counts.truncate(TOP_FACTOR_LIMIT);
    stats.top_factors = counts;

    Ok(stats)
}
