//! Refund ledger persistence, including the completion transaction.

use super::EngineStore;
use crate::{
    error::{EngineError, EngineResult},
    refund::{RefundInitiator, RefundRecord, RefundStatus, RefundType},
    transaction::{refund_change, TransactionRecord},
};
use rusqlite::{params, OptionalExtension, Row};

fn map_refund(row: &Row<'_>) -> rusqlite::Result<RefundRecord> {
    let status: String = row.get(4)?;
    let refund_type: String = row.get(3)?;
    Ok(RefundRecord {
        reference: row.get(0)?,
        transaction_ref: row.get(1)?,
        amount: row.get(2)?,
        refund_type: if refund_type == "full" {
            RefundType::Full
        } else {
            RefundType::Partial
        },
        status: RefundStatus::parse(&status).unwrap_or(RefundStatus::Failed),
        initiated_by: RefundInitiator {
            user_id: row.get(5)?,
            user_type: row.get(6)?,
        },
        approved_by: row.get(7)?,
        approved_at: row.get(8)?,
        approval_notes: row.get(9)?,
        gateway_response: row.get(10)?,
        created_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

const REFUND_COLUMNS: &str = "reference, transaction_ref, amount, refund_type, status, \
     initiated_by_user, initiated_by_type, approved_by, approved_at, approval_notes, \
     gateway_response, created_at, completed_at";

impl EngineStore {
    pub fn insert_refund(&self, record: &RefundRecord) -> EngineResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO refunds ({REFUND_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                record.reference,
                record.transaction_ref,
                record.amount,
                record.refund_type.as_str(),
                record.status.as_str(),
                record.initiated_by.user_id,
                record.initiated_by.user_type,
                record.approved_by,
                record.approved_at,
                record.approval_notes,
                record.gateway_response,
                record.created_at,
                record.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_refund(&self, refund_ref: &str) -> EngineResult<Option<RefundRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {REFUND_COLUMNS} FROM refunds WHERE reference = ?1"),
                params![refund_ref],
                map_refund,
            )
            .optional()?;
        Ok(record)
    }

    pub fn refunds_for_transaction(
        &self,
        transaction_ref: &str,
    ) -> EngineResult<Vec<RefundRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds
             WHERE transaction_ref = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![transaction_ref], map_refund)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn approve_refund(
        &self,
        refund_ref: &str,
        approver_id: &str,
        notes: Option<&str>,
        now: i64,
    ) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE refunds
             SET status = 'processing', approved_by = ?1, approved_at = ?2, approval_notes = ?3
             WHERE reference = ?4 AND status = 'pending'",
            params![approver_id, now, notes, refund_ref],
        )?;
        Ok(())
    }

    pub fn set_refund_status(
        &self,
        refund_ref: &str,
        status: &str,
        gateway_response: Option<&str>,
    ) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE refunds
             SET status = ?1, gateway_response = COALESCE(?2, gateway_response)
             WHERE reference = ?3 AND status != 'completed'",
            params![status, gateway_response, refund_ref],
        )?;
        Ok(())
    }

    /// Complete a refund and apply its amount to the transaction ledger as
    /// one atomic store transaction. Guards: the refund must not already be
    /// completed, the amount must still fit the remaining balance, and the
    /// transaction row must not have moved under us (version check — a
    /// conflict surfaces as `Concurrency` and the caller retries once).
    pub fn complete_refund_and_apply(
        &self,
        refund_ref: &str,
        gateway_response: Option<&str>,
        now: i64,
    ) -> EngineResult<(RefundRecord, TransactionRecord)> {
        let tx = self.conn.unchecked_transaction()?;

        let refund = self
            .get_refund(refund_ref)?
            .ok_or_else(|| EngineError::Validation(format!("unknown refund '{refund_ref}'")))?;

        match refund.status {
            RefundStatus::Completed => {
                return Err(EngineError::Validation(format!(
                    "refund '{refund_ref}' is already completed"
                )));
            }
            RefundStatus::Failed | RefundStatus::Cancelled => {
                return Err(EngineError::Validation(format!(
                    "refund '{refund_ref}' is {}, it cannot complete",
                    refund.status.as_str()
                )));
            }
            RefundStatus::Pending | RefundStatus::Processing => {}
        }

        let record = self
            .get_transaction(&refund.transaction_ref)?
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "unknown transaction '{}'",
                    refund.transaction_ref
                ))
            })?;

        let change = refund_change(&record, refund.amount, now)?;
        if !self.apply_monetary_change(&refund.transaction_ref, record.version, &change)? {
            return Err(EngineError::Concurrency(format!(
                "transaction '{}' changed during refund completion",
                refund.transaction_ref
            )));
        }

        self.conn.execute(
            "UPDATE refunds
             SET status = 'completed', gateway_response = COALESCE(?1, gateway_response),
                 completed_at = ?2
             WHERE reference = ?3",
            params![gateway_response, now, refund_ref],
        )?;

        tx.commit()?;

        let refund = self
            .get_refund(refund_ref)?
            .ok_or_else(|| EngineError::Validation(format!("unknown refund '{refund_ref}'")))?;
        let transaction = self
            .get_transaction(&refund.transaction_ref)?
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "unknown transaction '{}'",
                    refund.transaction_ref
                ))
            })?;
        Ok((refund, transaction))
    }
}
