//! Reporting tests — per-merchant aggregates over decided transactions.

use chrono::Duration;
use riskgate_core::{
    config::MerchantFraudSettings,
    engine::FraudEngine,
    error::EngineResult,
    rules::{RuleDescriptor, RuleField, RuleOp, RuleValue},
    Clock, EngineConfig, EngineStore, ManualClock, TransactionAttempt,
};
use std::sync::Arc;

fn build() -> (FraudEngine, Arc<ManualClock>) {
    let store = EngineStore::in_memory().expect("open store");
    store.migrate().expect("migrate");
    let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
    let engine = FraudEngine::new(store, EngineConfig::default(), clock.clone());
    engine
        .upsert_merchant_settings(&MerchantFraudSettings::with_defaults("m-1"))
        .expect("settings");
    (engine, clock)
}

fn attempt(clock: &ManualClock, email: &str) -> TransactionAttempt {
    TransactionAttempt {
        amount: 10_000,
        currency: "USD".to_string(),
        customer_email: Some(email.to_string()),
        merchant_id: "m-1".to_string(),
        ip_address: Some("203.0.113.5".to_string()),
        created_at: clock.now(),
        expires_at: None,
    }
}

fn weight_rule(weight: u32) -> RuleDescriptor {
    RuleDescriptor {
        id: "weight".to_string(),
        name: "synthetic weight".to_string(),
        field: RuleField::Amount,
        op: RuleOp::AtLeast,
        value: Some(RuleValue::Int(0)),
        weight,
        enabled: true,
    }
}

#[test]
fn stats_aggregate_outcomes_scores_and_factors() -> EngineResult<()> {
    let (engine, clock) = build();

    // Two clean allows, one flag at 45, one block at 85.
    engine.analyze_transaction(&attempt(&clock, "a@example.com"))?;
    engine.analyze_transaction(&attempt(&clock, "b@example.com"))?;
    engine.rules().upsert(weight_rule(45));
    engine.analyze_transaction(&attempt(&clock, "c@example.com"))?;
    engine.rules().upsert(weight_rule(85));
    engine.analyze_transaction(&attempt(&clock, "d@example.com"))?;
    engine.rules().set_enabled("weight", false);

    let stats = engine.merchant_stats(
        "m-1",
        clock.now() - Duration::hours(1),
        clock.now() + Duration::hours(1),
    )?;

    assert_eq!(stats.total_evaluated, 4);
    assert_eq!(stats.allowed, 2);
    assert_eq!(stats.flagged, 1);
    assert_eq!(stats.reviewed, 0);
    assert_eq!(stats.blocked, 1);
    assert!((stats.avg_risk_score - 32.5).abs() < 1e-9);

    let top = stats.top_factors.first().expect("factor counted");
    assert_eq!(top.name, "synthetic weight");
    assert_eq!(top.count, 2);
    Ok(())
}

#[test]
fn stats_respect_the_date_range_and_merchant() -> EngineResult<()> {
    let (engine, clock) = build();
    engine.analyze_transaction(&attempt(&clock, "a@example.com"))?;

    clock.advance(Duration::hours(6));
    engine.analyze_transaction(&attempt(&clock, "b@example.com"))?;

    // Only the second attempt falls inside the range.
    let stats = engine.merchant_stats(
        "m-1",
        clock.now() - Duration::hours(1),
        clock.now() + Duration::hours(1),
    )?;
    assert_eq!(stats.total_evaluated, 1);

    let other = engine.merchant_stats(
        "m-2",
        clock.now() - Duration::hours(24),
        clock.now() + Duration::hours(1),
    )?;
    assert_eq!(other.total_evaluated, 0);
    assert_eq!(other.avg_risk_score, 0.0);
    assert!(other.top_factors.is_empty());
    Ok(())
}
