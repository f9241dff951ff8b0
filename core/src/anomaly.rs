//! Anomaly detectors — statistical checks against historical aggregates.
//!
//! Both detectors are pure reads with no side effects. A failed or slow
//! historical query never blocks the pipeline: the configurable failure
//! policy either treats the detector as not triggered (fail-open, the
//! default) or contributes a single bounded score bump (fail-closed).

use crate::{
    clock::Clock,
    config::{AmountAnomalyConfig, DetectorFailurePolicy, GeoAnomalyConfig},
    error::{EngineError, EngineResult},
    scoring::Signal,
    store::EngineStore,
    transaction::TransactionAttempt,
    types::Amount,
};
use chrono::Duration;

pub const AMOUNT_FACTOR: &str = "unusual transaction amount";
pub const GEO_FACTOR: &str = "multiple locations detected";
pub const HISTORY_UNAVAILABLE_FACTOR: &str = "risk history unavailable";

/// Trailing-window amount statistics for one merchant.
#[derive(Debug, Clone, Copy)]
pub struct AmountStats {
    pub avg: f64,
    pub max: Amount,
}

/// Pure trigger check. An empty historical sample never triggers:
/// no false positives on cold start.
pub fn amount_triggered(
    current: Amount,
    stats: Option<AmountStats>,
    cfg: &AmountAnomalyConfig,
) -> bool {
    match stats {
        None => false,
        Some(AmountStats { avg, max }) => {
            (current as f64) > avg * cfg.avg_multiplier
                || (current as f64) > (max as f64) * cfg.max_multiplier
        }
    }
}

pub fn geo_triggered(distinct_locations: i64, cfg: &GeoAnomalyConfig) -> bool {
    distinct_locations > cfg.max_distinct_locations
}

/// Amount anomaly: current amount vs. trailing-window average/max over the
/// merchant's successful transactions.
pub fn check_amount(
    store: &EngineStore,
    clock: &dyn Clock,
    attempt: &TransactionAttempt,
    cfg: &AmountAnomalyConfig,
) -> EngineResult<Option<Signal>> {
    let since = (clock.now() - Duration::hours(cfg.window_hours)).timestamp_millis();
    let stats = store
        .merchant_amount_stats(&attempt.merchant_id, since)
        .map_err(|e| EngineError::DependencyUnavailable(format!("amount history query: {e}")))?;

    if amount_triggered(attempt.amount, stats, cfg) {
        Ok(Some(Signal {
            name: AMOUNT_FACTOR.to_string(),
            weight: cfg.weight,
        }))
    } else {
        Ok(None)
    }
}

/// Geographic anomaly: distinct non-null IPs seen for this customer identity
/// inside the trailing window. An unidentifiable customer never triggers.
pub fn check_geo(
    store: &EngineStore,
    clock: &dyn Clock,
    attempt: &TransactionAttempt,
    cfg: &GeoAnomalyConfig,
) -> EngineResult<Option<Signal>> {
    let email = match attempt.customer_email.as_deref() {
        Some(e) => e,
        None => return Ok(None),
    };

    let since = (clock.now() - Duration::hours(cfg.window_hours)).timestamp_millis();
    let distinct = store
        .distinct_customer_locations(email, since)
        .map_err(|e| EngineError::DependencyUnavailable(format!("location history query: {e}")))?;

    if geo_triggered(distinct, cfg) {
        Ok(Some(Signal {
            name: GEO_FACTOR.to_string(),
            weight: cfg.weight,
        }))
    } else {
        Ok(None)
    }
}

/// Apply the failure policy to one or more failed detector reads.
/// Returns at most one bump signal regardless of how many detectors failed.
pub fn on_detector_failure(failures: usize, policy: &DetectorFailurePolicy) -> Option<Signal> {
    if failures == 0 {
        return None;
    }
    match policy {
        DetectorFailurePolicy::Open => None,
        DetectorFailurePolicy::Closed { score_bump } => Some(Signal {
            name: HISTORY_UNAVAILABLE_FACTOR.to_string(),
            weight: *score_bump,
        }),
    }
}
