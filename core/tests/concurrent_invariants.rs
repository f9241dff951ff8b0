//! Concurrency tests over a real file-backed store.
//!
//! In-memory SQLite gives each connection its own database, so these tests
//! open a throwaway database file in the system temp directory and hand each
//! worker thread its own connection via `reopen`. WAL mode plus the busy
//! timeout lets writers queue instead of erroring.

use riskgate_core::{
    config::MerchantFraudSettings,
    engine::FraudEngine,
    error::EngineResult,
    rules::{RuleDescriptor, RuleField, RuleOp, RuleValue},
    review::ReviewStatus,
    EngineStore, TransactionAttempt, TransactionStatus,
};
use std::path::PathBuf;
use std::thread;

/// Temp database file, removed (with its WAL sidecars) on drop.
struct TempDb {
    path: PathBuf,
}

impl TempDb {
    fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!("riskgate-{tag}-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    fn open(&self) -> EngineStore {
        let store = EngineStore::open(self.path.to_str().expect("utf8 path")).expect("open store");
        store.migrate().expect("migrate");
        store
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut p = self.path.as_os_str().to_owned();
            p.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(p));
        }
    }
}

fn settle(engine: &FraudEngine, email: &str, amount: i64) -> String {
    let analysis = engine
        .analyze_transaction(&TransactionAttempt {
            amount,
            currency: "USD".to_string(),
            customer_email: Some(email.to_string()),
            merchant_id: "m-1".to_string(),
            ip_address: Some("203.0.113.4".to_string()),
            created_at: chrono::Utc::now(),
            expires_at: None,
        })
        .expect("analyze");
    engine
        .mark_as_processed(&analysis.transaction_ref, TransactionStatus::Success, None)
        .expect("settle");
    analysis.transaction_ref
}

#[test]
fn concurrent_velocity_increments_never_lose_counts() -> EngineResult<()> {
    let db = TempDb::new("velocity");
    let store = db.open();

    let now = 1_700_000_000_000i64;
    let expiry = now + 3_600_000;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let worker = store.reopen()?;
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                worker
                    .increment_velocity("m-1", "a@example.com", now, expiry)
                    .expect("increment");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    // Every increment landed: the upsert is a single serialized statement.
    let (count, stored_expiry) = store
        .velocity_count("m-1", "a@example.com")?
        .expect("counter row");
    assert_eq!(count, 100);
    assert_eq!(stored_expiry, expiry);
    Ok(())
}

/// Two refunds race for a balance that only covers one of them. Exactly one
/// applies; the loser fails the re-read after its version conflict. The
/// monetary invariant holds either way.
#[test]
fn concurrent_refunds_admit_exactly_one_winner() -> EngineResult<()> {
    let db = TempDb::new("refunds");
    let store = db.open();
    let engine = FraudEngine::with_defaults(store);
    engine.upsert_merchant_settings(&MerchantFraudSettings::with_defaults("m-1"))?;

    let reference = settle(&engine, "race@example.com", 100_000);

    let mut handles = Vec::new();
    for amount in [40_000i64, 70_000] {
        let worker = FraudEngine::with_defaults(engine.store.reopen()?);
        let reference = reference.clone();
        handles.push(thread::spawn(move || worker.add_refund(&reference, amount)));
    }

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked"))
        .collect();
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "outcomes: {outcomes:?}");

    let record = engine.store.get_transaction(&reference)?.expect("row");
    assert!(record.refunded_amount == 40_000 || record.refunded_amount == 70_000);
    assert!(record.refunded_amount + record.chargeback_amount <= record.amount);
    assert_eq!(record.status, TransactionStatus::PartiallyRefunded);
    Ok(())
}

/// Approve and deny race for the same pending case: the `status = 'pending'`
/// guard admits exactly one resolver, and the case and its transaction end
/// up matching whichever side won.
#[test]
fn concurrent_review_resolutions_agree() -> EngineResult<()> {
    let db = TempDb::new("review");
    let store = db.open();
    let engine = FraudEngine::with_defaults(store);
    engine.upsert_merchant_settings(&MerchantFraudSettings::with_defaults("m-1"))?;
    engine.rules().upsert(RuleDescriptor {
        id: "held".to_string(),
        name: "held for adjudication".to_string(),
        field: RuleField::Amount,
        op: RuleOp::AtLeast,
        value: Some(RuleValue::Int(0)),
        weight: 65,
        enabled: true,
    });

    let analysis = engine.analyze_transaction(&TransactionAttempt {
        amount: 50_000,
        currency: "USD".to_string(),
        customer_email: Some("held@example.com".to_string()),
        merchant_id: "m-1".to_string(),
        ip_address: None,
        created_at: chrono::Utc::now(),
        expires_at: None,
    })?;
    let case_id = analysis.review_case_id.expect("case opened");

    let approve = {
        let worker = FraudEngine::with_defaults(engine.store.reopen()?);
        let case_id = case_id.clone();
        thread::spawn(move || worker.approve_review(&case_id))
    };
    let deny = {
        let worker = FraudEngine::with_defaults(engine.store.reopen()?);
        let case_id = case_id.clone();
        thread::spawn(move || worker.deny_review(&case_id))
    };

    let approve = approve.join().expect("worker panicked");
    let deny = deny.join().expect("worker panicked");
    assert!(approve.is_ok() ^ deny.is_ok());

    let case = engine.store.get_review_case(&case_id)?.expect("case row");
    let record = engine
        .store
        .get_transaction(&analysis.transaction_ref)?
        .expect("row");
    match case.status {
        ReviewStatus::Approved => assert_eq!(record.status, TransactionStatus::Processing),
        ReviewStatus::Denied => assert_eq!(record.status, TransactionStatus::Failed),
        ReviewStatus::Pending => panic!("case left unresolved"),
    }
    Ok(())
}
