//! Transaction state machine and monetary ledger.
//!
//! Every mutation follows the same discipline: fresh read, pure guard
//! computation, version-guarded conditional write. A version conflict is a
//! `Concurrency` error and is retried once with a fresh read before
//! surfacing; validation failures surface immediately. The monetary
//! invariant `0 <= refunded + chargeback <= amount` holds after every
//! operation — the guards enforce it and the schema CHECK backs them up.

use crate::{
    clock::Clock,
    error::{EngineError, EngineResult},
    event::EngineEvent,
    store::EngineStore,
    types::{Amount, MerchantId, UnixMillis},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Expired,
    Refunded,
    PartiallyRefunded,
    Chargeback,
    Disputed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::PartiallyRefunded => "partially_refunded",
            TransactionStatus::Chargeback => "chargeback",
            TransactionStatus::Disputed => "disputed",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "expired" => Ok(TransactionStatus::Expired),
            "refunded" => Ok(TransactionStatus::Refunded),
            "partially_refunded" => Ok(TransactionStatus::PartiallyRefunded),
            "chargeback" => Ok(TransactionStatus::Chargeback),
            "disputed" => Ok(TransactionStatus::Disputed),
            other => Err(EngineError::Validation(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }

    /// Statuses from which a refund may be applied. The remaining-amount
    /// guard handles exhausted balances on top of this.
    pub fn refundable(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::PartiallyRefunded
                | TransactionStatus::Chargeback
                | TransactionStatus::Disputed
        )
    }

    pub fn chargebackable(&self) -> bool {
        self.refundable() || matches!(self, TransactionStatus::Refunded)
    }
}

/// Gateway-driven transitions accepted by `mark_as_processed`.
pub fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus::*;
    match from {
        Pending => matches!(to, Processing | Failed | Cancelled | Expired),
        Processing => matches!(to, Success | Failed | Cancelled | Expired),
        // Repeated success reports are tolerated (idempotent); disputes open
        // from a settled transaction.
        Success => matches!(to, Success | Disputed),
        Disputed => matches!(to, Disputed),
        _ => false,
    }
}

/// The raw attempt record supplied by the request-handling layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionAttempt {
    pub amount: Amount,
    pub currency: String,
    pub customer_email: Option<String>,
    pub merchant_id: MerchantId,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One persisted transaction row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub reference: String,
    pub merchant_id: MerchantId,
    pub customer_email: Option<String>,
    pub ip_address: Option<String>,
    pub amount: Amount,
    pub currency: String,
    pub fees: Amount,
    pub refunded_amount: Amount,
    pub chargeback_amount: Amount,
    pub status: TransactionStatus,
    pub fraud_score: Option<u32>,
    pub fraud_factors: Vec<String>,
    pub decision: Option<String>,
    pub cancel_reason: Option<String>,
    pub gateway_response: Option<String>,
    pub version: i64,
    pub created_at: UnixMillis,
    pub processed_at: Option<UnixMillis>,
    pub refunded_at: Option<UnixMillis>,
    pub expires_at: Option<UnixMillis>,
}

impl TransactionRecord {
    /// Maximum further reversible value.
    pub fn remaining_amount(&self) -> Amount {
        self.amount - self.refunded_amount - self.chargeback_amount
    }
}

/// Computed outcome of a refund or chargeback guard check.
#[derive(Debug, Clone)]
pub struct MonetaryChange {
    pub status: TransactionStatus,
    pub refunded_amount: Amount,
    pub chargeback_amount: Amount,
    pub refunded_at: Option<UnixMillis>,
}

/// Pure refund guard: validates the amount against the remaining balance and
/// computes the new totals and status. Chargeback presence keeps the status
/// pinned at `chargeback`.
pub fn refund_change(
    record: &TransactionRecord,
    amount: Amount,
    now: UnixMillis,
) -> EngineResult<MonetaryChange> {
    if amount <= 0 {
        return Err(EngineError::Validation(
            "refund amount must be positive".to_string(),
        ));
    }
    if !record.status.refundable() {
        return Err(EngineError::InvalidTransition {
            from: record.status.as_str().to_string(),
            to: "refunded".to_string(),
        });
    }
    let remaining = record.remaining_amount();
    if amount > remaining {
        return Err(EngineError::AmountExceedsRemaining {
            requested: amount,
            remaining,
        });
    }

    let refunded = record.refunded_amount + amount;
    let status = if record.chargeback_amount > 0 {
        TransactionStatus::Chargeback
    } else if refunded + record.chargeback_amount == record.amount {
        TransactionStatus::Refunded
    } else {
        TransactionStatus::PartiallyRefunded
    };

    Ok(MonetaryChange {
        status,
        refunded_amount: refunded,
        chargeback_amount: record.chargeback_amount,
        refunded_at: Some(now),
    })
}

/// Pure chargeback guard. Status becomes `chargeback` unconditionally:
/// a forced reversal always takes precedence over refund statuses.
pub fn chargeback_change(record: &TransactionRecord, amount: Amount) -> EngineResult<MonetaryChange> {
    if amount <= 0 {
        return Err(EngineError::Validation(
            "chargeback amount must be positive".to_string(),
        ));
    }
    if !record.status.chargebackable() {
        return Err(EngineError::InvalidTransition {
            from: record.status.as_str().to_string(),
            to: "chargeback".to_string(),
        });
    }
    let remaining = record.remaining_amount();
    if amount > remaining {
        return Err(EngineError::AmountExceedsRemaining {
            requested: amount,
            remaining,
        });
    }

    Ok(MonetaryChange {
        status: TransactionStatus::Chargeback,
        refunded_amount: record.refunded_amount,
        chargeback_amount: record.chargeback_amount + amount,
        refunded_at: record.refunded_at,
    })
}

fn fetch(store: &EngineStore, reference: &str) -> EngineResult<TransactionRecord> {
    store.get_transaction(reference)?.ok_or_else(|| {
        EngineError::Validation(format!("unknown transaction '{reference}'"))
    })
}

/// Retry a version-guarded mutation once on conflict, per the propagation
/// policy: a fresh read may still pass the guard legitimately.
fn with_retry<F>(mut op: F) -> EngineResult<TransactionRecord>
where
    F: FnMut() -> EngineResult<TransactionRecord>,
{
    match op() {
        Err(e) if e.is_concurrency() => {
            log::debug!("version conflict, retrying with fresh read");
            op()
        }
        other => other,
    }
}

/// Gateway callback: set the reported status. Entering `success` stamps
/// `processed_at` exactly once; a repeated `success` is a no-op.
pub fn mark_as_processed(
    store: &EngineStore,
    clock: &dyn Clock,
    reference: &str,
    status: TransactionStatus,
    gateway_response: Option<&str>,
) -> EngineResult<TransactionRecord> {
    with_retry(|| {
        let record = fetch(store, reference)?;

        if record.status == TransactionStatus::Success && status == TransactionStatus::Success {
            return Ok(record);
        }
        if !can_transition(record.status, status) {
            return Err(EngineError::InvalidTransition {
                from: record.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let processed_at = match (status, record.processed_at) {
            (TransactionStatus::Success, None) => Some(clock.now_millis()),
            (_, existing) => existing,
        };

        if !store.set_transaction_processed(
            reference,
            record.version,
            status.as_str(),
            processed_at,
            gateway_response,
        )? {
            return Err(EngineError::Concurrency(format!(
                "transaction '{reference}' changed during processing update"
            )));
        }

        let updated = fetch(store, reference)?;
        store.append_engine_event(
            &EngineEvent::TransactionProcessed {
                reference: reference.to_string(),
                status: status.as_str().to_string(),
            },
            clock.now_millis(),
        )?;
        Ok(updated)
    })
}

pub fn add_refund(
    store: &EngineStore,
    clock: &dyn Clock,
    reference: &str,
    amount: Amount,
) -> EngineResult<TransactionRecord> {
    with_retry(|| {
        let record = fetch(store, reference)?;
        let change = refund_change(&record, amount, clock.now_millis())?;

        if !store.apply_monetary_change(reference, record.version, &change)? {
            return Err(EngineError::Concurrency(format!(
                "transaction '{reference}' changed during refund"
            )));
        }

        let updated = fetch(store, reference)?;
        store.append_engine_event(
            &EngineEvent::RefundApplied {
                reference: reference.to_string(),
                amount,
                total_refunded: updated.refunded_amount,
            },
            clock.now_millis(),
        )?;
        Ok(updated)
    })
}

pub fn add_chargeback(
    store: &EngineStore,
    clock: &dyn Clock,
    reference: &str,
    amount: Amount,
) -> EngineResult<TransactionRecord> {
    with_retry(|| {
        let record = fetch(store, reference)?;
        let change = chargeback_change(&record, amount)?;

        if !store.apply_monetary_change(reference, record.version, &change)? {
            return Err(EngineError::Concurrency(format!(
                "transaction '{reference}' changed during chargeback"
            )));
        }

        let updated = fetch(store, reference)?;
        store.append_engine_event(
            &EngineEvent::ChargebackRecorded {
                reference: reference.to_string(),
                amount,
                total_chargeback: updated.chargeback_amount,
            },
            clock.now_millis(),
        )?;
        Ok(updated)
    })
}

/// Only valid from `pending` or `processing`.
pub fn cancel(
    store: &EngineStore,
    clock: &dyn Clock,
    reference: &str,
    reason: &str,
) -> EngineResult<TransactionRecord> {
    with_retry(|| {
        let record = fetch(store, reference)?;

        if !matches!(
            record.status,
            TransactionStatus::Pending | TransactionStatus::Processing
        ) {
            return Err(EngineError::InvalidTransition {
                from: record.status.as_str().to_string(),
                to: "cancelled".to_string(),
            });
        }

        if !store.set_transaction_cancelled(reference, record.version, reason)? {
            return Err(EngineError::Concurrency(format!(
                "transaction '{reference}' changed during cancellation"
            )));
        }

        let updated = fetch(store, reference)?;
        store.append_engine_event(
            &EngineEvent::TransactionCancelled {
                reference: reference.to_string(),
                reason: reason.to_string(),
            },
            clock.now_millis(),
        )?;
        Ok(updated)
    })
}
