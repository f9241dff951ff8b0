//! Velocity counter — fixed-window attempt counting per (merchant, customer).
//!
//! The whole read-modify-write lives in ONE upsert statement inside the
//! store: an expired window resets to 1 with a fresh expiry, a live window
//! increments. Two concurrent first-requests in an empty window therefore
//! serialize to counts 1 and 2 — never two independent resets.

use crate::{
    clock::Clock,
    config::VelocityConfig,
    error::EngineResult,
    scoring::Signal,
    store::EngineStore,
    transaction::TransactionAttempt,
    types::CustomerKey,
};

/// Factor name contributed when the threshold is exceeded.
pub const VELOCITY_FACTOR: &str = "high velocity transactions";

/// Stable customer identity for counting: email when present, IP as a
/// fallback, a sentinel when neither is known.
pub fn customer_key(attempt: &TransactionAttempt) -> CustomerKey {
    attempt
        .customer_email
        .clone()
        .or_else(|| attempt.ip_address.clone())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Atomically bump the counter for this attempt's key and return the count
/// observed inside the current window.
pub fn increment(
    store: &EngineStore,
    clock: &dyn Clock,
    attempt: &TransactionAttempt,
    cfg: &VelocityConfig,
) -> EngineResult<i64> {
    let now = clock.now_millis();
    let expires = now + cfg.window_secs * 1000;
    store.increment_velocity(&attempt.merchant_id, &customer_key(attempt), now, expires)
}

/// Turn a window count into a scoring signal, if over the threshold.
pub fn signal_for_count(count: i64, cfg: &VelocityConfig) -> Option<Signal> {
    if count > cfg.threshold {
        Some(Signal {
            name: VELOCITY_FACTOR.to_string(),
            weight: cfg.weight,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_strictly_greater_than() {
        let cfg = VelocityConfig::default();
        assert!(signal_for_count(5, &cfg).is_none());
        let signal = signal_for_count(6, &cfg).unwrap();
        assert_eq!(signal.name, VELOCITY_FACTOR);
        assert_eq!(signal.weight, 30);
    }
}
