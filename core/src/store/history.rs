//! Historical aggregate queries consumed by the anomaly detectors and the
//! merchant reporting surface. Pure reads.

use super::EngineStore;
use crate::{anomaly::AmountStats, error::EngineResult};
use rusqlite::params;

/// One evaluated transaction's decision row, for aggregate statistics.
#[derive(Debug, Clone)]
pub struct DecisionRow {
    pub decision: Option<String>,
    pub fraud_score: Option<i64>,
    pub fraud_factors: Option<String>,
}

impl EngineStore {
    /// Trailing-window AVG/MAX amount over the merchant's successful
    /// transactions. `processed_at IS NOT NULL` identifies attempts that
    /// reached `success`, whatever their status is now. None when the
    /// sample is empty.
    pub fn merchant_amount_stats(
        &self,
        merchant_id: &str,
        since: i64,
    ) -> EngineResult<Option<AmountStats>> {
        let (avg, max): (Option<f64>, Option<i64>) = self.conn.query_row(
            "SELECT AVG(amount), MAX(amount)
             FROM transactions
             WHERE merchant_id = ?1 AND processed_at IS NOT NULL AND created_at >= ?2",
            params![merchant_id, since],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(match (avg, max) {
            (Some(avg), Some(max)) => Some(AmountStats { avg, max }),
            _ => None,
        })
    }

    /// Distinct non-null IPs seen for this customer identity in the window.
    pub fn distinct_customer_locations(
        &self,
        customer_email: &str,
        since: i64,
    ) -> EngineResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(DISTINCT ip_address)
             FROM transactions
             WHERE customer_email = ?1 AND created_at >= ?2 AND ip_address IS NOT NULL",
            params![customer_email, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// All evaluated decisions for a merchant in a date range.
    pub fn decision_rows(
        &self,
        merchant_id: &str,
        from: i64,
        to: i64,
    ) -> EngineResult<Vec<DecisionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT decision, fraud_score, fraud_factors
             FROM transactions
             WHERE merchant_id = ?1 AND created_at >= ?2 AND created_at < ?3
               AND decision IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![merchant_id, from, to], |row| {
                Ok(DecisionRow {
                    decision: row.get(0)?,
                    fraud_score: row.get(1)?,
                    fraud_factors: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
