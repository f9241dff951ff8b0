//! Velocity counter persistence — the atomic increment-or-reset upsert.

use super::EngineStore;
use crate::error::EngineResult;
use rusqlite::params;

impl EngineStore {
    /// Single-statement read-modify-write: create at 1, reset an expired
    /// window to 1 with a fresh expiry, otherwise increment. Returns the
    /// count inside the current window. SQLite serializes writers, so two
    /// concurrent calls can never both observe an empty window.
    pub fn increment_velocity(
        &self,
        merchant_id: &str,
        customer_key: &str,
        now: i64,
        new_expiry: i64,
    ) -> EngineResult<i64> {
        let count = self.conn.query_row(
            "INSERT INTO velocity_counters (merchant_id, customer_key, count, window_expires_at)
             VALUES (?1, ?2, 1, ?4)
             ON CONFLICT (merchant_id, customer_key) DO UPDATE SET
                 count = CASE
                     WHEN velocity_counters.window_expires_at <= ?3 THEN 1
                     ELSE velocity_counters.count + 1
                 END,
                 window_expires_at = CASE
                     WHEN velocity_counters.window_expires_at <= ?3 THEN ?4
                     ELSE velocity_counters.window_expires_at
                 END
             RETURNING count",
            params![merchant_id, customer_key, now, new_expiry],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Current counter state, if any. Diagnostic surface for tests/tools.
    pub fn velocity_count(
        &self,
        merchant_id: &str,
        customer_key: &str,
    ) -> EngineResult<Option<(i64, i64)>> {
        use rusqlite::OptionalExtension;
        let row = self
            .conn
            .query_row(
                "SELECT count, window_expires_at FROM velocity_counters
                 WHERE merchant_id = ?1 AND customer_key = ?2",
                params![merchant_id, customer_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}
