//! Transaction row persistence and version-guarded updates.

use super::EngineStore;
use crate::{
    error::EngineResult,
    transaction::{MonetaryChange, TransactionRecord, TransactionStatus},
};
use rusqlite::{params, OptionalExtension, Row};

fn map_transaction(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let status_str: String = row.get(9)?;
    let factors_json: Option<String> = row.get(11)?;
    Ok(TransactionRecord {
        reference: row.get(0)?,
        merchant_id: row.get(1)?,
        customer_email: row.get(2)?,
        ip_address: row.get(3)?,
        amount: row.get(4)?,
        currency: row.get(5)?,
        fees: row.get(6)?,
        refunded_amount: row.get(7)?,
        chargeback_amount: row.get(8)?,
        status: TransactionStatus::parse(&status_str).unwrap_or(TransactionStatus::Failed),
        fraud_score: row.get(10)?,
        fraud_factors: factors_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        decision: row.get(12)?,
        cancel_reason: row.get(13)?,
        gateway_response: row.get(14)?,
        version: row.get(15)?,
        created_at: row.get(16)?,
        processed_at: row.get(17)?,
        refunded_at: row.get(18)?,
        expires_at: row.get(19)?,
    })
}

const TRANSACTION_COLUMNS: &str = "reference, merchant_id, customer_email, ip_address, amount, \
     currency, fees, refunded_amount, chargeback_amount, status, fraud_score, fraud_factors, \
     decision, cancel_reason, gateway_response, version, created_at, processed_at, refunded_at, \
     expires_at";

impl EngineStore {
    pub fn insert_transaction(&self, record: &TransactionRecord) -> EngineResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO transactions ({TRANSACTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
            ),
            params![
                record.reference,
                record.merchant_id,
                record.customer_email,
                record.ip_address,
                record.amount,
                record.currency,
                record.fees,
                record.refunded_amount,
                record.chargeback_amount,
                record.status.as_str(),
                record.fraud_score,
                serde_json::to_string(&record.fraud_factors)?,
                record.decision,
                record.cancel_reason,
                record.gateway_response,
                record.version,
                record.created_at,
                record.processed_at,
                record.refunded_at,
                record.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_transaction(&self, reference: &str) -> EngineResult<Option<TransactionRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = ?1"),
                params![reference],
                map_transaction,
            )
            .optional()?;
        Ok(record)
    }

    /// Gateway status update with version guard. Returns false on conflict.
    pub fn set_transaction_processed(
        &self,
        reference: &str,
        expected_version: i64,
        status: &str,
        processed_at: Option<i64>,
        gateway_response: Option<&str>,
    ) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE transactions
             SET status = ?1,
                 processed_at = ?2,
                 gateway_response = COALESCE(?3, gateway_response),
                 version = version + 1
             WHERE reference = ?4 AND version = ?5",
            params![status, processed_at, gateway_response, reference, expected_version],
        )?;
        Ok(changed == 1)
    }

    /// Refund/chargeback totals update with version guard.
    pub fn apply_monetary_change(
        &self,
        reference: &str,
        expected_version: i64,
        change: &MonetaryChange,
    ) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE transactions
             SET status = ?1,
                 refunded_amount = ?2,
                 chargeback_amount = ?3,
                 refunded_at = COALESCE(?4, refunded_at),
                 version = version + 1
             WHERE reference = ?5 AND version = ?6",
            params![
                change.status.as_str(),
                change.refunded_amount,
                change.chargeback_amount,
                change.refunded_at,
                reference,
                expected_version
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn set_transaction_cancelled(
        &self,
        reference: &str,
        expected_version: i64,
        reason: &str,
    ) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE transactions
             SET status = 'cancelled', cancel_reason = ?1, version = version + 1
             WHERE reference = ?2 AND version = ?3",
            params![reason, reference, expected_version],
        )?;
        Ok(changed == 1)
    }
}
