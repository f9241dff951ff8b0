//! Review case persistence and atomic resolution.

use super::EngineStore;
use crate::{
    error::{EngineError, EngineResult},
    review::{ReviewCase, ReviewStatus},
};
use rusqlite::{params, OptionalExtension, Row};

fn map_case(row: &Row<'_>) -> rusqlite::Result<ReviewCase> {
    let status: String = row.get(5)?;
    let factors_json: String = row.get(4)?;
    Ok(ReviewCase {
        case_id: row.get(0)?,
        transaction_ref: row.get(1)?,
        risk_score: row.get(2)?,
        risk_level: row.get(3)?,
        factors: serde_json::from_str(&factors_json).unwrap_or_default(),
        status: ReviewStatus::parse(&status).unwrap_or(ReviewStatus::Pending),
        created_at: row.get(6)?,
        resolved_at: row.get(7)?,
    })
}

const CASE_COLUMNS: &str =
    "case_id, transaction_ref, risk_score, risk_level, factors, status, created_at, resolved_at";

impl EngineStore {
    pub fn insert_review_case(&self, case: &ReviewCase) -> EngineResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO review_cases ({CASE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                case.case_id,
                case.transaction_ref,
                case.risk_score,
                case.risk_level,
                serde_json::to_string(&case.factors)?,
                case.status.as_str(),
                case.created_at,
                case.resolved_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_review_case(&self, case_id: &str) -> EngineResult<Option<ReviewCase>> {
        let case = self
            .conn
            .query_row(
                &format!("SELECT {CASE_COLUMNS} FROM review_cases WHERE case_id = ?1"),
                params![case_id],
                map_case,
            )
            .optional()?;
        Ok(case)
    }

    pub fn pending_review_cases(&self) -> EngineResult<Vec<ReviewCase>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CASE_COLUMNS} FROM review_cases
             WHERE status = 'pending' ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map([], map_case)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Resolve a pending case and move its held transaction, atomically.
    /// Exactly one concurrent resolver can win the `status = 'pending'`
    /// guard; losers get `Concurrency` and sort out idempotence upstream.
    /// The transaction is only released if it is still held in `pending`.
    pub fn resolve_review_case(
        &self,
        case_id: &str,
        resolution: &str,
        released_status: &str,
        now: i64,
    ) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let changed = self.conn.execute(
            "UPDATE review_cases
             SET status = ?1, resolved_at = ?2
             WHERE case_id = ?3 AND status = 'pending'",
            params![resolution, now, case_id],
        )?;
        if changed == 0 {
            return Err(EngineError::Concurrency(format!(
                "review case '{case_id}' was resolved concurrently"
            )));
        }

        let transaction_ref: String = self.conn.query_row(
            "SELECT transaction_ref FROM review_cases WHERE case_id = ?1",
            params![case_id],
            |row| row.get(0),
        )?;

        self.conn.execute(
            "UPDATE transactions
             SET status = ?1, version = version + 1
             WHERE reference = ?2 AND status = 'pending'",
            params![released_status, transaction_ref],
        )?;

        tx.commit()?;
        Ok(())
    }
}
