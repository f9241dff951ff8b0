//! gate-runner: headless driver for the riskgate fraud engine.
//!
//! Usage:
//!   gate-runner --db gate.db
//!   gate-runner --db gate.db --burst 8
//!
//! Seeds a demo merchant, pushes a handful of attempts through the engine
//! (including a burst that trips the velocity counter), walks one refund
//! through its lifecycle and prints the merchant's aggregate statistics.

use anyhow::Result;
use chrono::{Duration, Utc};
use riskgate_core::{
    config::MerchantFraudSettings,
    refund::{RefundInitiator, RefundStatus},
    EngineStore, FraudEngine, TransactionAttempt, TransactionStatus,
};
use std::env;

fn parse_args() -> (String, usize) {
    let args: Vec<String> = env::args().collect();
    let mut db = "gate.db".to_string();
    let mut burst = 8usize;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db = args[i + 1].clone();
                i += 2;
            }
            "--burst" if i + 1 < args.len() => {
                burst = args[i + 1].parse().unwrap_or(burst);
                i += 2;
            }
            other => {
                eprintln!("ignoring unknown argument: {other}");
                i += 1;
            }
        }
    }
    (db, burst)
}

fn attempt(merchant: &str, email: &str, ip: &str, amount: i64) -> TransactionAttempt {
    TransactionAttempt {
        amount,
        currency: "USD".to_string(),
        customer_email: Some(email.to_string()),
        merchant_id: merchant.to_string(),
        ip_address: Some(ip.to_string()),
        created_at: Utc::now(),
        expires_at: None,
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let (db, burst) = parse_args();

    let store = EngineStore::open(&db)?;
    store.migrate()?;
    let engine = FraudEngine::with_defaults(store);

    let merchant = "demo-merchant";
    engine.upsert_merchant_settings(&MerchantFraudSettings {
        merchant_id: merchant.to_string(),
        enabled: true,
        block_threshold: 80,
        review_threshold: 55,
        flag_threshold: 40,
    })?;

    // A clean attempt: settles and gets partially refunded.
    let analysis = engine.analyze_transaction(&attempt(merchant, "carol@example.com", "198.51.100.7", 120_00))?;
    println!(
        "clean attempt    -> action={} score={} ref={}",
        analysis.action.as_str(),
        analysis.assessment.score,
        analysis.transaction_ref
    );

    if analysis.action.as_str() == "allow" {
        engine.mark_as_processed(&analysis.transaction_ref, TransactionStatus::Success, Some("{\"gateway\":\"ok\"}"))?;
        let refund = engine.request_refund(
            &analysis.transaction_ref,
            40_00,
            RefundInitiator {
                user_id: "ops-1".to_string(),
                user_type: "merchant".to_string(),
            },
        )?;
        engine.approve_refund(&refund.reference, "admin-1", Some("customer request"))?;
        let (refund, tx) =
            engine.mark_refund_processed(&refund.reference, RefundStatus::Completed, None)?;
        let tx = tx.expect("completed refund returns the transaction");
        println!(
            "refund           -> {} {} on {} (refunded {} / {})",
            refund.reference,
            refund.status.as_str(),
            tx.reference,
            tx.refunded_amount,
            tx.amount
        );
    }

    // A burst from one customer: trips the velocity counter.
    let mut last = None;
    for _ in 0..burst {
        last = Some(engine.analyze_transaction(&attempt(merchant, "dave@example.com", "203.0.113.9", 90_00))?);
    }
    if let Some(analysis) = last {
        println!(
            "burst attempt    -> action={} score={} factors={:?}",
            analysis.action.as_str(),
            analysis.assessment.score,
            analysis.assessment.factors
        );
        if let Some(case_id) = analysis.review_case_id {
            let case = engine.approve_review(&case_id)?;
            println!("review           -> case {} {}", case.case_id, case.status.as_str());
        }
    }

    // An outsized amount: rule hit plus amount anomaly against the history
    // the earlier attempts just created.
    let analysis = engine.analyze_transaction(&attempt(merchant, "erin@example.com", "192.0.2.4", 9_000_00))?;
    println!(
        "outsized attempt -> action={} score={} reason={:?}",
        analysis.action.as_str(),
        analysis.assessment.score,
        analysis.reason
    );

    let stats = engine.merchant_stats(
        merchant,
        Utc::now() - Duration::hours(1),
        Utc::now() + Duration::hours(1),
    )?;
    println!(
        "stats            -> evaluated={} allowed={} flagged={} reviewed={} blocked={} avg_score={:.1}",
        stats.total_evaluated,
        stats.allowed,
        stats.flagged,
        stats.reviewed,
        stats.blocked,
        stats.avg_risk_score
    );
    for factor in stats.top_factors {
        println!("  factor {} x{}", factor.name, factor.count);
    }

    Ok(())
}
