//! Refund ledger — partial reversals with their own lifecycle.
//!
//! A refund is requested in `pending`, optionally approved, then marked
//! processed by the gateway. Only a `completed` outcome touches the
//! transaction's monetary totals, and it does so inside a single store
//! transaction under the version guard. Completed refunds are immutable:
//! a second completion attempt is an error, never a silent re-apply.

use crate::{
    clock::Clock,
    error::{EngineError, EngineResult},
    event::EngineEvent,
    store::EngineStore,
    transaction::TransactionRecord,
    types::{Amount, TransactionRef, UnixMillis},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
            RefundStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "pending" => Ok(RefundStatus::Pending),
            "processing" => Ok(RefundStatus::Processing),
            "completed" => Ok(RefundStatus::Completed),
            "failed" => Ok(RefundStatus::Failed),
            "cancelled" => Ok(RefundStatus::Cancelled),
            other => Err(EngineError::Validation(format!(
                "unknown refund status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Full,
    Partial,
}

impl RefundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundType::Full => "full",
            RefundType::Partial => "partial",
        }
    }
}

/// Who asked for the reversal (merchant operator, platform admin, system).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundInitiator {
    pub user_id: String,
    pub user_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub reference: String,
    pub transaction_ref: TransactionRef,
    pub amount: Amount,
    pub refund_type: RefundType,
    pub status: RefundStatus,
    pub initiated_by: RefundInitiator,
    pub approved_by: Option<String>,
    pub approved_at: Option<UnixMillis>,
    pub approval_notes: Option<String>,
    pub gateway_response: Option<String>,
    pub created_at: UnixMillis,
    pub completed_at: Option<UnixMillis>,
}

fn fetch(store: &EngineStore, refund_ref: &str) -> EngineResult<RefundRecord> {
    store
        .get_refund(refund_ref)?
        .ok_or_else(|| EngineError::Validation(format!("unknown refund '{refund_ref}'")))
}

/// Open a refund in `pending`. The amount is validated against the
/// transaction's remaining balance at request time; the completion step
/// re-validates under the version guard.
pub fn request(
    store: &EngineStore,
    clock: &dyn Clock,
    transaction_ref: &str,
    amount: Amount,
    initiated_by: RefundInitiator,
) -> EngineResult<RefundRecord> {
    let transaction = store.get_transaction(transaction_ref)?.ok_or_else(|| {
        EngineError::Validation(format!("unknown transaction '{transaction_ref}'"))
    })?;

    if amount <= 0 {
        return Err(EngineError::Validation(
            "refund amount must be positive".to_string(),
        ));
    }
    if !transaction.status.refundable() {
        return Err(EngineError::InvalidTransition {
            from: transaction.status.as_str().to_string(),
            to: "refunded".to_string(),
        });
    }
    let remaining = transaction.remaining_amount();
    if amount > remaining {
        return Err(EngineError::AmountExceedsRemaining {
            requested: amount,
            remaining,
        });
    }

    let record = RefundRecord {
        reference: format!("rf-{}", Uuid::new_v4()),
        transaction_ref: transaction_ref.to_string(),
        amount,
        refund_type: if amount == transaction.amount {
            RefundType::Full
        } else {
            RefundType::Partial
        },
        status: RefundStatus::Pending,
        initiated_by,
        approved_by: None,
        approved_at: None,
        approval_notes: None,
        gateway_response: None,
        created_at: clock.now_millis(),
        completed_at: None,
    };
    store.insert_refund(&record)?;
    store.append_engine_event(
        &EngineEvent::RefundRequested {
            refund_ref: record.reference.clone(),
            reference: transaction_ref.to_string(),
            amount,
        },
        clock.now_millis(),
    )?;
    Ok(record)
}

/// Record approval metadata and move the refund into `processing`.
pub fn approve(
    store: &EngineStore,
    clock: &dyn Clock,
    refund_ref: &str,
    approver_id: &str,
    notes: Option<&str>,
) -> EngineResult<RefundRecord> {
    let refund = fetch(store, refund_ref)?;
    if refund.status != RefundStatus::Pending {
        return Err(EngineError::Validation(format!(
            "refund '{refund_ref}' is {}, only pending refunds can be approved",
            refund.status.as_str()
        )));
    }

    store.approve_refund(refund_ref, approver_id, notes, clock.now_millis())?;
    store.append_engine_event(
        &EngineEvent::RefundApproved {
            refund_ref: refund_ref.to_string(),
            approved_by: approver_id.to_string(),
        },
        clock.now_millis(),
    )?;
    fetch(store, refund_ref)
}

/// Gateway outcome for a refund. `completed` applies the amount to the
/// transaction ledger; any other outcome only moves the refund's own status.
pub fn mark_processed(
    store: &EngineStore,
    clock: &dyn Clock,
    refund_ref: &str,
    status: RefundStatus,
    gateway_response: Option<&str>,
) -> EngineResult<(RefundRecord, Option<TransactionRecord>)> {
    match status {
        RefundStatus::Completed => {
            let (refund, transaction) = complete_with_retry(store, clock, refund_ref, gateway_response)?;
            Ok((refund, Some(transaction)))
        }
        RefundStatus::Pending => Err(EngineError::Validation(
            "cannot move a refund back to pending".to_string(),
        )),
        other => {
            let refund = fetch(store, refund_ref)?;
            if refund.status == RefundStatus::Completed {
                return Err(EngineError::Validation(format!(
                    "refund '{refund_ref}' is completed and immutable"
                )));
            }
            store.set_refund_status(refund_ref, other.as_str(), gateway_response)?;
            store.append_engine_event(
                &EngineEvent::RefundClosed {
                    refund_ref: refund_ref.to_string(),
                    status: other.as_str().to_string(),
                },
                clock.now_millis(),
            )?;
            Ok((fetch(store, refund_ref)?, None))
        }
    }
}

fn complete_with_retry(
    store: &EngineStore,
    clock: &dyn Clock,
    refund_ref: &str,
    gateway_response: Option<&str>,
) -> EngineResult<(RefundRecord, TransactionRecord)> {
    let attempt = || store.complete_refund_and_apply(refund_ref, gateway_response, clock.now_millis());
    let (refund, transaction) = match attempt() {
        Err(e) if e.is_concurrency() => {
            log::debug!("refund completion hit a version conflict, retrying");
            attempt()?
        }
        other => other?,
    };

    store.append_engine_event(
        &EngineEvent::RefundCompleted {
            refund_ref: refund.reference.clone(),
            reference: refund.transaction_ref.clone(),
            amount: refund.amount,
        },
        clock.now_millis(),
    )?;
    Ok((refund, transaction))
}
