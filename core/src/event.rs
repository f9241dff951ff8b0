//! Engine events — one entry per externally visible state change.
//!
//! Every decision and every monetary mutation is appended to the event log,
//! keyed by transaction reference. The log is append-only and is the audit
//! trail reporting reads from.

use crate::types::{Amount, TransactionRef};
use serde::{Deserialize, Serialize};

/// Every event the engine can emit. Variants are added, never reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // ── Evaluation ─────────────────────────────────
    TransactionRecorded {
        reference: TransactionRef,
        merchant_id: String,
        amount: Amount,
        action: String,
        score: u32,
    },
    RiskAssessed {
        reference: TransactionRef,
        score: u32,
        level: String,
        factors: Vec<String>,
    },

    // ── Review workflow ────────────────────────────
    ReviewCaseOpened {
        case_id: String,
        reference: TransactionRef,
        score: u32,
    },
    ReviewCaseResolved {
        case_id: String,
        reference: TransactionRef,
        resolution: String,
    },

    // ── Transaction lifecycle ──────────────────────
    TransactionProcessed {
        reference: TransactionRef,
        status: String,
    },
    TransactionCancelled {
        reference: TransactionRef,
        reason: String,
    },
    ChargebackRecorded {
        reference: TransactionRef,
        amount: Amount,
        total_chargeback: Amount,
    },
    RefundApplied {
        reference: TransactionRef,
        amount: Amount,
        total_refunded: Amount,
    },

    // ── Refund ledger ──────────────────────────────
    RefundRequested {
        refund_ref: String,
        reference: TransactionRef,
        amount: Amount,
    },
    RefundApproved {
        refund_ref: String,
        approved_by: String,
    },
    RefundCompleted {
        refund_ref: String,
        reference: TransactionRef,
        amount: Amount,
    },
    RefundClosed {
        refund_ref: String,
        status: String,
    },
}

impl EngineEvent {
    /// Stable string name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            EngineEvent::TransactionRecorded { .. } => "transaction_recorded",
            EngineEvent::RiskAssessed { .. } => "risk_assessed",
            EngineEvent::ReviewCaseOpened { .. } => "review_case_opened",
            EngineEvent::ReviewCaseResolved { .. } => "review_case_resolved",
            EngineEvent::TransactionProcessed { .. } => "transaction_processed",
            EngineEvent::TransactionCancelled { .. } => "transaction_cancelled",
            EngineEvent::ChargebackRecorded { .. } => "chargeback_recorded",
            EngineEvent::RefundApplied { .. } => "refund_applied",
            EngineEvent::RefundRequested { .. } => "refund_requested",
            EngineEvent::RefundApproved { .. } => "refund_approved",
            EngineEvent::RefundCompleted { .. } => "refund_completed",
            EngineEvent::RefundClosed { .. } => "refund_closed",
        }
    }

    /// The transaction reference this event is logged under.
    pub fn reference(&self) -> &str {
        match self {
            EngineEvent::TransactionRecorded { reference, .. }
            | EngineEvent::RiskAssessed { reference, .. }
            | EngineEvent::ReviewCaseOpened { reference, .. }
            | EngineEvent::ReviewCaseResolved { reference, .. }
            | EngineEvent::TransactionProcessed { reference, .. }
            | EngineEvent::TransactionCancelled { reference, .. }
            | EngineEvent::ChargebackRecorded { reference, .. }
            | EngineEvent::RefundApplied { reference, .. }
            | EngineEvent::RefundRequested { reference, .. }
            | EngineEvent::RefundCompleted { reference, .. } => reference,
            EngineEvent::RefundApproved { refund_ref, .. }
            | EngineEvent::RefundClosed { refund_ref, .. } => refund_ref,
        }
    }
}

/// One persisted row of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub reference: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: i64,
}
