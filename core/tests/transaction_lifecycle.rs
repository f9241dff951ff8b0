//! Transaction state machine and monetary ledger tests.
//!
//! Cover: idempotent settlement, refund/chargeback guards against the
//! remaining balance, chargeback status precedence, cancellation rules and
//! the event trail.

use riskgate_core::{
    config::MerchantFraudSettings,
    engine::FraudEngine,
    error::{EngineError, EngineResult},
    ManualClock, Clock, EngineConfig, EngineStore, TransactionAttempt, TransactionStatus,
};
use chrono::Duration;
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

fn attempt(clock: &ManualClock, email: &str, amount: i64) -> TransactionAttempt {
    TransactionAttempt {
        amount,
        currency: "USD".to_string(),
        customer_email: Some(email.to_string()),
        merchant_id: "m-1".to_string(),
        ip_address: Some("203.0.113.1".to_string()),
        created_at: clock.now(),
        expires_at: None,
    }
}

/// Push one clean attempt through to `success` and return its reference.
fn settle(engine: &FraudEngine, clock: &ManualClock, email: &str, amount: i64) -> String {
    let analysis = engine
        .analyze_transaction(&attempt(clock, email, amount))
        .expect("analyze");
    engine
        .mark_as_processed(&analysis.transaction_ref, TransactionStatus::Success, None)
        .expect("settle");
    analysis.transaction_ref
}

#[test]
fn success_stamps_processed_at_exactly_once() -> EngineResult<()> {
    let (engine, clock) = build();
    let analysis = engine.analyze_transaction(&attempt(&clock, "a@example.com", 50_000))?;

    let first = engine.mark_as_processed(
        &analysis.transaction_ref,
        TransactionStatus::Success,
        Some("{\"auth\":\"ok\"}"),
    )?;
    let stamped = first.processed_at.expect("stamped on settlement");

    // A repeated success report is a no-op: same stamp, same version.
    clock.advance(Duration::seconds(90));
    let second = engine.mark_as_processed(
        &analysis.transaction_ref,
        TransactionStatus::Success,
        None,
    )?;
    assert_eq!(second.processed_at, Some(stamped));
    assert_eq!(second.version, first.version);
    Ok(())
}

#[test]
fn gateway_cannot_settle_a_failed_transaction() -> EngineResult<()> {
    let (engine, clock) = build();
    let analysis = engine.analyze_transaction(&attempt(&clock, "b@example.com", 50_000))?;
    engine.mark_as_processed(&analysis.transaction_ref, TransactionStatus::Failed, None)?;

    let err = engine
        .mark_as_processed(&analysis.transaction_ref, TransactionStatus::Success, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    Ok(())
}

/// The ledger scenario: refund 40_000 of 100_000, then reject 70_000
/// because only 60_000 remains.
#[test]
fn refund_is_bounded_by_the_remaining_balance() -> EngineResult<()> {
    let (engine, clock) = build();
    let reference = settle(&engine, &clock, "c@example.com", 100_000);

    let after_first = engine.add_refund(&reference, 40_000)?;
    assert_eq!(after_first.refunded_amount, 40_000);
    assert_eq!(after_first.status, TransactionStatus::PartiallyRefunded);
    assert!(after_first.refunded_at.is_some());

    let err = engine.add_refund(&reference, 70_000).unwrap_err();
    match err {
        EngineError::AmountExceedsRemaining {
            requested,
            remaining,
        } => {
            assert_eq!(requested, 70_000);
            assert_eq!(remaining, 60_000);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The failed refund left the ledger untouched.
    let record = engine.store.get_transaction(&reference)?.expect("row");
    assert_eq!(record.refunded_amount, 40_000);
    assert_eq!(record.status, TransactionStatus::PartiallyRefunded);
    Ok(())
}

#[test]
fn exhausting_the_balance_marks_refunded() -> EngineResult<()> {
    let (engine, clock) = build();
    let reference = settle(&engine, &clock, "d@example.com", 100_000);

    engine.add_refund(&reference, 40_000)?;
    let full = engine.add_refund(&reference, 60_000)?;
    assert_eq!(full.refunded_amount, 100_000);
    assert_eq!(full.remaining_amount(), 0);
    assert_eq!(full.status, TransactionStatus::Refunded);

    // Nothing left to reverse.
    let err = engine.add_refund(&reference, 1).unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    Ok(())
}

#[test]
fn chargeback_status_takes_precedence_over_refunds() -> EngineResult<()> {
    let (engine, clock) = build();
    let reference = settle(&engine, &clock, "e@example.com", 100_000);

    engine.add_refund(&reference, 30_000)?;
    let after_cb = engine.add_chargeback(&reference, 20_000)?;
    assert_eq!(after_cb.status, TransactionStatus::Chargeback);
    assert_eq!(after_cb.chargeback_amount, 20_000);

    // A further refund fits the remaining 50_000 but the status stays
    // pinned at chargeback.
    let after_refund = engine.add_refund(&reference, 50_000)?;
    assert_eq!(after_refund.status, TransactionStatus::Chargeback);
    assert_eq!(after_refund.refunded_amount, 80_000);
    assert_eq!(after_refund.remaining_amount(), 0);
    Ok(())
}

#[test]
fn chargeback_is_bounded_by_the_remaining_balance() -> EngineResult<()> {
    let (engine, clock) = build();
    let reference = settle(&engine, &clock, "f@example.com", 100_000);
    engine.add_refund(&reference, 90_000)?;

    let err = engine.add_chargeback(&reference, 20_000).unwrap_err();
    assert!(matches!(err, EngineError::AmountExceedsRemaining { .. }));
    Ok(())
}

#[test]
fn fully_refunded_transactions_still_accept_chargebacks() -> EngineResult<()> {
    let (engine, clock) = build();
    let reference = settle(&engine, &clock, "g@example.com", 100_000);
    engine.add_refund(&reference, 100_000)?;

    // remaining is 0, so any chargeback amount is over the limit — but the
    // status gate itself admits `refunded`.
    let err = engine.add_chargeback(&reference, 1).unwrap_err();
    assert!(matches!(err, EngineError::AmountExceedsRemaining { .. }));
    Ok(())
}

#[test]
fn refunds_require_a_settled_transaction() -> EngineResult<()> {
    let (engine, clock) = build();
    let analysis = engine.analyze_transaction(&attempt(&clock, "h@example.com", 50_000))?;

    // Still `processing`: no money has moved yet.
    let err = engine.add_refund(&analysis.transaction_ref, 10_000).unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    Ok(())
}

#[test]
fn zero_and_negative_refunds_are_rejected() -> EngineResult<()> {
    let (engine, clock) = build();
    let reference = settle(&engine, &clock, "i@example.com", 50_000);

    assert!(engine.add_refund(&reference, 0).unwrap_err().is_validation());
    assert!(engine.add_refund(&reference, -5).unwrap_err().is_validation());
    Ok(())
}

#[test]
fn cancel_is_limited_to_pending_and_processing() -> EngineResult<()> {
    let (engine, clock) = build();

    let analysis = engine.analyze_transaction(&attempt(&clock, "j@example.com", 50_000))?;
    let cancelled = engine.cancel(&analysis.transaction_ref, "customer abandoned")?;
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("customer abandoned"));

    let settled = settle(&engine, &clock, "k@example.com", 50_000);
    let err = engine.cancel(&settled, "too late").unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    Ok(())
}

#[test]
fn every_mutation_lands_in_the_event_log() -> EngineResult<()> {
    let (engine, clock) = build();
    let reference = settle(&engine, &clock, "l@example.com", 100_000);
    engine.add_refund(&reference, 25_000)?;
    engine.add_chargeback(&reference, 10_000)?;

    let events = engine.events_for_transaction(&reference)?;
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    for expected in [
        "risk_assessed",
        "transaction_recorded",
        "transaction_processed",
        "refund_applied",
        "chargeback_recorded",
    ] {
        assert!(
            types.contains(&expected),
            "missing event '{expected}' in {types:?}"
        );
    }
    Ok(())
}
