//! Risk scoring pipeline tests.
//!
//! Cover: the zero-score clean path, the velocity + amount-anomaly review
//! scenario, geographic anomalies, score clamping and the disabled gate.

use chrono::Duration;
use riskgate_core::{
    config::MerchantFraudSettings,
    engine::FraudEngine,
    error::{EngineError, EngineResult},
    gate::GateAction,
    rules::{RuleDescriptor, RuleField, RuleOp, RuleValue},
    scoring::RiskLevel,
    ManualClock, EngineConfig, EngineStore, TransactionAttempt, TransactionStatus,
};
use std::sync::Arc;

const START_MS: i64 = 1_700_000_000_000;

fn build(settings: MerchantFraudSettings) -> (FraudEngine, Arc<ManualClock>) {
    let store = EngineStore::in_memory().expect("open store");
    store.migrate().expect("migrate");
    let clock = Arc::new(ManualClock::at_millis(START_MS));
    let engine = FraudEngine::new(store, EngineConfig::default(), clock.clone());
    engine.upsert_merchant_settings(&settings).expect("settings");
    (engine, clock)
}

fn attempt(clock: &ManualClock, email: &str, ip: &str, amount: i64) -> TransactionAttempt {
    use riskgate_core::Clock;
    TransactionAttempt {
        amount,
        currency: "USD".to_string(),
        customer_email: Some(email.to_string()),
        merchant_id: "m-1".to_string(),
        ip_address: Some(ip.to_string()),
        created_at: clock.now(),
        expires_at: None,
    }
}

/// Constant-weight helper rule that triggers on every attempt.
fn always_rule(weight: u32) -> RuleDescriptor {
    RuleDescriptor {
        id: "always".to_string(),
        name: "always triggered".to_string(),
        field: RuleField::Amount,
        op: RuleOp::AtLeast,
        value: Some(RuleValue::Int(0)),
        weight,
        enabled: true,
    }
}

#[test]
fn clean_attempt_scores_zero_and_allows() -> EngineResult<()> {
    let (engine, clock) = build(MerchantFraudSettings::with_defaults("m-1"));

    let analysis =
        engine.analyze_transaction(&attempt(&clock, "alice@example.com", "203.0.113.5", 100_000))?;

    assert_eq!(analysis.assessment.score, 0);
    assert_eq!(analysis.assessment.level, RiskLevel::Low);
    assert_eq!(analysis.action, GateAction::Allow);
    assert!(!analysis.is_fraudulent);
    assert!(!analysis.flagged);
    assert!(analysis.assessment.factors.is_empty());

    let record = engine
        .store
        .get_transaction(&analysis.transaction_ref)?
        .expect("persisted");
    assert_eq!(record.status, TransactionStatus::Processing);
    Ok(())
}

/// A 6th attempt in the window (velocity +30) with an outsized amount (+25)
/// scores 55 and is held for review.
#[test]
fn velocity_and_amount_anomaly_hold_for_review() -> EngineResult<()> {
    let (engine, clock) = build(MerchantFraudSettings {
        merchant_id: "m-1".to_string(),
        enabled: true,
        block_threshold: 70,
        review_threshold: 50,
        flag_threshold: 30,
    });

    // Five settled attempts build the velocity window and amount history.
    for _ in 0..5 {
        let analysis = engine.analyze_transaction(&attempt(
            &clock,
            "bob@example.com",
            "203.0.113.5",
            10_000,
        ))?;
        assert_eq!(analysis.action, GateAction::Allow);
        engine.mark_as_processed(&analysis.transaction_ref, TransactionStatus::Success, None)?;
    }

    let analysis = engine.analyze_transaction(&attempt(
        &clock,
        "bob@example.com",
        "203.0.113.5",
        100_000,
    ))?;

    assert_eq!(analysis.assessment.score, 55);
    assert_eq!(analysis.action, GateAction::Review);
    assert!(analysis
        .assessment
        .factors
        .iter()
        .any(|f| f == "high velocity transactions"));
    assert!(analysis
        .assessment
        .factors
        .iter()
        .any(|f| f == "unusual transaction amount"));

    // Transaction held, case opened with the score snapshot.
    let record = engine
        .store
        .get_transaction(&analysis.transaction_ref)?
        .expect("persisted");
    assert_eq!(record.status, TransactionStatus::Pending);

    let case_id = analysis.review_case_id.expect("review case opened");
    let case = engine.store.get_review_case(&case_id)?.expect("case row");
    assert_eq!(case.risk_score, 55);
    assert_eq!(case.transaction_ref, analysis.transaction_ref);
    Ok(())
}

#[test]
fn geographic_anomaly_triggers_on_third_location() -> EngineResult<()> {
    let (engine, clock) = build(MerchantFraudSettings::with_defaults("m-1"));

    for ip in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        engine.analyze_transaction(&attempt(&clock, "carol@example.com", ip, 5_000))?;
    }

    let analysis = engine.analyze_transaction(&attempt(
        &clock,
        "carol@example.com",
        "198.51.100.4",
        5_000,
    ))?;
    assert!(analysis
        .assessment
        .factors
        .iter()
        .any(|f| f == "multiple locations detected"));
    assert_eq!(analysis.assessment.score, 20);
    Ok(())
}

#[test]
fn history_outside_the_window_is_ignored() -> EngineResult<()> {
    let (engine, clock) = build(MerchantFraudSettings::with_defaults("m-1"));

    for ip in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        engine.analyze_transaction(&attempt(&clock, "dan@example.com", ip, 5_000))?;
    }

    // Two days later the 24h geo window is empty again.
    clock.advance(Duration::hours(48));
    let analysis =
        engine.analyze_transaction(&attempt(&clock, "dan@example.com", "198.51.100.9", 5_000))?;
    assert_eq!(analysis.assessment.score, 0);
    Ok(())
}

#[test]
fn score_clamps_at_one_hundred() -> EngineResult<()> {
    let (engine, clock) = build(MerchantFraudSettings::with_defaults("m-1"));
    engine.rules().upsert(always_rule(150));

    let analysis =
        engine.analyze_transaction(&attempt(&clock, "eve@example.com", "203.0.113.6", 1_000))?;
    assert_eq!(analysis.assessment.score, 100);
    assert_eq!(analysis.assessment.level, RiskLevel::Critical);
    assert_eq!(analysis.action, GateAction::Block);
    assert!(analysis.is_fraudulent);
    Ok(())
}

#[test]
fn disabled_gate_allows_but_still_scores() -> EngineResult<()> {
    let mut settings = MerchantFraudSettings::with_defaults("m-1");
    settings.enabled = false;
    let (engine, clock) = build(settings);
    engine.rules().upsert(always_rule(90));

    let analysis =
        engine.analyze_transaction(&attempt(&clock, "frank@example.com", "203.0.113.7", 1_000))?;
    assert_eq!(analysis.action, GateAction::Allow);
    assert_eq!(analysis.assessment.score, 90);

    // Score persisted for observability even though the gate is off.
    let record = engine
        .store
        .get_transaction(&analysis.transaction_ref)?
        .expect("persisted");
    assert_eq!(record.fraud_score, Some(90));
    assert_eq!(record.status, TransactionStatus::Processing);
    Ok(())
}

#[test]
fn missing_merchant_settings_is_a_configuration_error() {
    let (engine, clock) = build(MerchantFraudSettings::with_defaults("m-1"));
    let mut a = attempt(&clock, "gina@example.com", "203.0.113.8", 1_000);
    a.merchant_id = "unknown-merchant".to_string();

    let err = engine.analyze_transaction(&a).unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}

#[test]
fn rule_toggle_changes_next_evaluation_only() -> EngineResult<()> {
    let (engine, clock) = build(MerchantFraudSettings::with_defaults("m-1"));
    engine.rules().upsert(always_rule(45));

    let first =
        engine.analyze_transaction(&attempt(&clock, "hugo@example.com", "203.0.113.9", 1_000))?;
    assert_eq!(first.assessment.score, 45);
    assert_eq!(first.action, GateAction::Flag);
    assert!(first.flagged);

    engine.rules().set_enabled("always", false);
    let second =
        engine.analyze_transaction(&attempt(&clock, "hugo@example.com", "203.0.113.9", 1_000))?;
    assert_eq!(second.assessment.score, 0);
    Ok(())
}
