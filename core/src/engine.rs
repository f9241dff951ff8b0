//! The fraud engine — fan-out/fan-in orchestration of one evaluation.
//!
//! EVALUATION ORDER (fixed):
//!   1. Merchant settings are read fresh from the store (never cached).
//!   2. The rule set is snapshotted; rules evaluate in-process.
//!   3. Velocity and the two anomaly detectors run as independent reads,
//!      fanned out across worker threads (one store connection each) with a
//!      bounded fan-in deadline. Errors and timeouts go through the
//!      configured failure policy.
//!   4. The scorer folds all signals into the assessment.
//!   5. The gate picks the action; the transaction is persisted at its
//!      gated status and, for `review`, a ReviewCase is opened.
//!
//! The decision is final for the evaluation — a retry is a fresh call.

use crate::{
    anomaly,
    clock::Clock,
    config::{DetectorConfig, EngineConfig, MerchantFraudSettings},
    error::{EngineError, EngineResult},
    event::{EngineEvent, EventLogEntry},
    gate::{self, GateAction},
    refund::{self, RefundInitiator, RefundRecord, RefundStatus},
    review::{self, ReviewCase, ReviewStatus},
    rules::RuleRegistry,
    scoring::{self, RiskAssessment, Signal},
    stats::{self, MerchantFraudStats},
    store::EngineStore,
    transaction::{
        self, TransactionAttempt, TransactionRecord, TransactionStatus,
    },
    velocity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of one synchronous evaluation, returned to the request layer
/// before the transaction is committed to `processing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAnalysis {
    pub transaction_ref: String,
    pub is_fraudulent: bool,
    pub flagged: bool,
    pub action: GateAction,
    pub reason: Option<String>,
    pub assessment: RiskAssessment,
    pub review_case_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorKind {
    Velocity,
    Amount,
    Geo,
}

impl DetectorKind {
    const ALL: [DetectorKind; 3] = [DetectorKind::Velocity, DetectorKind::Amount, DetectorKind::Geo];

    fn name(&self) -> &'static str {
        match self {
            DetectorKind::Velocity => "velocity",
            DetectorKind::Amount => "amount_anomaly",
            DetectorKind::Geo => "geo_anomaly",
        }
    }

    fn index(&self) -> usize {
        match self {
            DetectorKind::Velocity => 0,
            DetectorKind::Amount => 1,
            DetectorKind::Geo => 2,
        }
    }
}

fn run_detector(
    store: &EngineStore,
    clock: &dyn Clock,
    attempt: &TransactionAttempt,
    cfg: &DetectorConfig,
    kind: DetectorKind,
) -> EngineResult<Option<Signal>> {
    match kind {
        DetectorKind::Velocity => {
            let count = velocity::increment(store, clock, attempt, &cfg.velocity)
                .map_err(|e| EngineError::DependencyUnavailable(format!("velocity store: {e}")))?;
            Ok(velocity::signal_for_count(count, &cfg.velocity))
        }
        DetectorKind::Amount => anomaly::check_amount(store, clock, attempt, &cfg.amount),
        DetectorKind::Geo => anomaly::check_geo(store, clock, attempt, &cfg.geo),
    }
}

pub struct FraudEngine {
    pub store: EngineStore,
    rules: RuleRegistry,
    detectors: DetectorConfig,
    clock: Arc<dyn Clock>,
}

impl FraudEngine {
    pub fn new(store: EngineStore, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            rules: RuleRegistry::new(config.rules),
            detectors: config.detectors,
            clock,
        }
    }

    /// Engine over a migrated store with default config and the system clock.
    pub fn with_defaults(store: EngineStore) -> Self {
        Self::new(
            store,
            EngineConfig::default(),
            Arc::new(crate::clock::SystemClock),
        )
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    // ── Evaluation ─────────────────────────────────────────────

    pub fn analyze_transaction(&self, attempt: &TransactionAttempt) -> EngineResult<FraudAnalysis> {
        let settings = self
            .store
            .merchant_settings(&attempt.merchant_id)?
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "no fraud settings stored for merchant '{}'",
                    attempt.merchant_id
                ))
            })?;

        let ruleset = self.rules.snapshot();
        let mut signals = ruleset.evaluate(attempt);
        signals.extend(self.detector_signals(attempt));

        let assessment = scoring::assess(&signals);
        let decision = gate::decide(&settings, assessment.score);

        let reference = format!("txn-{}", Uuid::new_v4());
        let status = match decision.action {
            GateAction::Allow | GateAction::Flag => TransactionStatus::Processing,
            GateAction::Review => TransactionStatus::Pending, // held for adjudication
            GateAction::Block => TransactionStatus::Failed,
        };

        let record = TransactionRecord {
            reference: reference.clone(),
            merchant_id: attempt.merchant_id.clone(),
            customer_email: attempt.customer_email.clone(),
            ip_address: attempt.ip_address.clone(),
            amount: attempt.amount,
            currency: attempt.currency.clone(),
            fees: 0,
            refunded_amount: 0,
            chargeback_amount: 0,
            status,
            fraud_score: Some(assessment.score),
            fraud_factors: assessment.factors.clone(),
            decision: Some(decision.action.as_str().to_string()),
            cancel_reason: None,
            gateway_response: None,
            version: 0,
            created_at: attempt.created_at.timestamp_millis(),
            processed_at: None,
            refunded_at: None,
            expires_at: attempt.expires_at.map(|t| t.timestamp_millis()),
        };
        self.store.insert_transaction(&record)?;

        let now = self.clock.now_millis();
        self.store.append_engine_event(
            &EngineEvent::RiskAssessed {
                reference: reference.clone(),
                score: assessment.score,
                level: assessment.level.as_str().to_string(),
                factors: assessment.factors.clone(),
            },
            now,
        )?;
        self.store.append_engine_event(
            &EngineEvent::TransactionRecorded {
                reference: reference.clone(),
                merchant_id: attempt.merchant_id.clone(),
                amount: attempt.amount,
                action: decision.action.as_str().to_string(),
                score: assessment.score,
            },
            now,
        )?;

        let mut review_case_id = None;
        if decision.action == GateAction::Review {
            let case = ReviewCase {
                case_id: format!("rc-{}", Uuid::new_v4()),
                transaction_ref: reference.clone(),
                risk_score: assessment.score,
                risk_level: assessment.level.as_str().to_string(),
                factors: assessment.factors.clone(),
                status: ReviewStatus::Pending,
                created_at: now,
                resolved_at: None,
            };
            self.store.insert_review_case(&case)?;
            self.store.append_engine_event(
                &EngineEvent::ReviewCaseOpened {
                    case_id: case.case_id.clone(),
                    reference: reference.clone(),
                    score: assessment.score,
                },
                now,
            )?;
            log::info!(
                "transaction {reference} held for review (score {})",
                assessment.score
            );
            review_case_id = Some(case.case_id);
        }

        Ok(FraudAnalysis {
            transaction_ref: reference,
            is_fraudulent: decision.action == GateAction::Block,
            flagged: decision.action == GateAction::Flag,
            action: decision.action,
            reason: decision.reason,
            assessment,
            review_case_id,
        })
    }

    /// Velocity + anomaly reads: concurrent fan-out when the store supports
    /// a second reader, sequential fallback otherwise. Failures and
    /// timeouts never propagate — they go through the failure policy.
    fn detector_signals(&self, attempt: &TransactionAttempt) -> Vec<Signal> {
        let outcomes = if self.store.supports_concurrent_readers() {
            self.fan_out(attempt)
        } else {
            DetectorKind::ALL
                .iter()
                .map(|kind| {
                    (
                        *kind,
                        run_detector(
                            &self.store,
                            self.clock.as_ref(),
                            attempt,
                            &self.detectors,
                            *kind,
                        ),
                    )
                })
                .collect()
        };

        let mut signals = Vec::new();
        let mut failures = 0usize;
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("{} detector unavailable: {e}", kind.name());
                    failures += 1;
                }
            }
        }
        if let Some(bump) = anomaly::on_detector_failure(failures, &self.detectors.failure_policy) {
            signals.push(bump);
        }
        signals
    }

    fn fan_out(&self, attempt: &TransactionAttempt) -> Vec<(DetectorKind, EngineResult<Option<Signal>>)> {
        let (sender, receiver) = mpsc::channel();

        for kind in DetectorKind::ALL {
            let sender = sender.clone();
            match self.store.reopen() {
                Ok(store) => {
                    let attempt = attempt.clone();
                    let cfg = self.detectors.clone();
                    let clock = Arc::clone(&self.clock);
                    std::thread::spawn(move || {
                        let outcome = run_detector(&store, clock.as_ref(), &attempt, &cfg, kind);
                        let _ = sender.send((kind, outcome));
                    });
                }
                Err(e) => {
                    let _ = sender.send((kind, Err(e)));
                }
            }
        }
        drop(sender);

        let deadline =
            Instant::now() + Duration::from_millis(self.detectors.timeout_ms_or_default());
        let mut outcomes: Vec<(DetectorKind, EngineResult<Option<Signal>>)> = Vec::new();
        let mut seen = [false; 3];

        for _ in 0..DetectorKind::ALL.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok((kind, outcome)) => {
                    seen[kind.index()] = true;
                    outcomes.push((kind, outcome));
                }
                Err(_) => break, // deadline passed or all workers gone
            }
        }

        for kind in DetectorKind::ALL {
            if !seen[kind.index()] {
                outcomes.push((
                    kind,
                    Err(EngineError::DependencyUnavailable(format!(
                        "{} detector timed out",
                        kind.name()
                    ))),
                ));
            }
        }
        outcomes
    }

    // ── Review resolution ──────────────────────────────────────

    pub fn approve_review(&self, case_id: &str) -> EngineResult<ReviewCase> {
        review::approve(&self.store, self.clock.as_ref(), case_id)
    }

    pub fn deny_review(&self, case_id: &str) -> EngineResult<ReviewCase> {
        review::deny(&self.store, self.clock.as_ref(), case_id)
    }

    // ── Transaction mutation surface ───────────────────────────

    pub fn mark_as_processed(
        &self,
        reference: &str,
        status: TransactionStatus,
        gateway_response: Option<&str>,
    ) -> EngineResult<TransactionRecord> {
        transaction::mark_as_processed(
            &self.store,
            self.clock.as_ref(),
            reference,
            status,
            gateway_response,
        )
    }

    pub fn add_refund(&self, reference: &str, amount: i64) -> EngineResult<TransactionRecord> {
        transaction::add_refund(&self.store, self.clock.as_ref(), reference, amount)
    }

    pub fn add_chargeback(&self, reference: &str, amount: i64) -> EngineResult<TransactionRecord> {
        transaction::add_chargeback(&self.store, self.clock.as_ref(), reference, amount)
    }

    pub fn cancel(&self, reference: &str, reason: &str) -> EngineResult<TransactionRecord> {
        transaction::cancel(&self.store, self.clock.as_ref(), reference, reason)
    }

    // ── Refund ledger surface ──────────────────────────────────

    pub fn request_refund(
        &self,
        transaction_ref: &str,
        amount: i64,
        initiated_by: RefundInitiator,
    ) -> EngineResult<RefundRecord> {
        refund::request(
            &self.store,
            self.clock.as_ref(),
            transaction_ref,
            amount,
            initiated_by,
        )
    }

    pub fn approve_refund(
        &self,
        refund_ref: &str,
        approver_id: &str,
        notes: Option<&str>,
    ) -> EngineResult<RefundRecord> {
        refund::approve(&self.store, self.clock.as_ref(), refund_ref, approver_id, notes)
    }

    pub fn mark_refund_processed(
        &self,
        refund_ref: &str,
        status: RefundStatus,
        gateway_response: Option<&str>,
    ) -> EngineResult<(RefundRecord, Option<TransactionRecord>)> {
        refund::mark_processed(
            &self.store,
            self.clock.as_ref(),
            refund_ref,
            status,
            gateway_response,
        )
    }

    // ── Configuration & reporting ──────────────────────────────

    pub fn upsert_merchant_settings(&self, settings: &MerchantFraudSettings) -> EngineResult<()> {
        self.store
            .upsert_merchant_settings(settings, self.clock.now_millis())
    }

    pub fn merchant_stats(
        &self,
        merchant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<MerchantFraudStats> {
        stats::merchant_stats(&self.store, merchant_id, from, to)
    }

    pub fn events_for_transaction(&self, reference: &str) -> EngineResult<Vec<EventLogEntry>> {
        self.store.events_for_reference(reference)
    }
}
