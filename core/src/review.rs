//! Review cases — held decisions awaiting human adjudication.
//!
//! A case is opened only when the gate selects `review`; the transaction is
//! held in `pending` until an adjudicator resolves the case. Resolution is
//! idempotent: repeating the same outcome is a no-op, flipping an already
//! resolved case is a validation error. Case and transaction move together
//! in one store transaction.

use crate::{
    clock::Clock,
    error::{EngineError, EngineResult},
    event::EngineEvent,
    store::EngineStore,
    types::{TransactionRef, UnixMillis},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Denied,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "denied" => Ok(ReviewStatus::Denied),
            other => Err(EngineError::Validation(format!(
                "unknown review status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCase {
    pub case_id: String,
    pub transaction_ref: TransactionRef,
    pub risk_score: u32,
    pub risk_level: String,
    /// Factor snapshot taken at decision time.
    pub factors: Vec<String>,
    pub status: ReviewStatus,
    pub created_at: UnixMillis,
    pub resolved_at: Option<UnixMillis>,
}

/// Approve: case -> approved, held transaction released to `processing`.
pub fn approve(store: &EngineStore, clock: &dyn Clock, case_id: &str) -> EngineResult<ReviewCase> {
    resolve(store, clock, case_id, ReviewStatus::Approved, "processing")
}

/// Deny: case -> denied, held transaction moved to `failed`.
pub fn deny(store: &EngineStore, clock: &dyn Clock, case_id: &str) -> EngineResult<ReviewCase> {
    resolve(store, clock, case_id, ReviewStatus::Denied, "failed")
}

fn resolve(
    store: &EngineStore,
    clock: &dyn Clock,
    case_id: &str,
    target: ReviewStatus,
    released_status: &str,
) -> EngineResult<ReviewCase> {
    let case = store
        .get_review_case(case_id)?
        .ok_or_else(|| EngineError::Validation(format!("unknown review case '{case_id}'")))?;

    match case.status {
        status if status == target => return Ok(case), // repeat resolution: no-op
        ReviewStatus::Pending => {}
        other => {
            return Err(EngineError::Validation(format!(
                "review case '{case_id}' is already {}",
                other.as_str()
            )));
        }
    }

    match store.resolve_review_case(case_id, target.as_str(), released_status, clock.now_millis()) {
        Ok(()) => {}
        Err(e) if e.is_concurrency() => {
            // Lost a resolution race. If the winner chose the same outcome
            // this call is still a no-op; otherwise it is a conflict.
            let fresh = store.get_review_case(case_id)?.ok_or_else(|| {
                EngineError::Validation(format!("unknown review case '{case_id}'"))
            })?;
            if fresh.status == target {
                return Ok(fresh);
            }
            return Err(EngineError::Validation(format!(
                "review case '{case_id}' is already {}",
                fresh.status.as_str()
            )));
        }
        Err(e) => return Err(e),
    }

    store.append_engine_event(
        &EngineEvent::ReviewCaseResolved {
            case_id: case_id.to_string(),
            reference: case.transaction_ref.clone(),
            resolution: target.as_str().to_string(),
        },
        clock.now_millis(),
    )?;

    store
        .get_review_case(case_id)?
        .ok_or_else(|| EngineError::Validation(format!("unknown review case '{case_id}'")))
}
