//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Domain modules call store methods — they never execute SQL directly.

mod history;
mod refund;
mod review;
mod transaction;
mod velocity;

use crate::{
    config::MerchantFraudSettings,
    error::EngineResult,
    event::{EngineEvent, EventLogEntry},
};
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Duration;

pub use history::DecisionRow;

pub struct EngineStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file/URI
}

impl EngineStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a new connection to the same database. Used by the engine's
    /// detector fan-out, which needs one connection per worker.
    /// For plain in-memory stores this yields an isolated database, so the
    /// engine only fans out when `supports_concurrent_readers` holds.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Whether reopened connections observe the same data.
    pub fn supports_concurrent_readers(&self) -> bool {
        self.path.is_some()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_transactions.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/003_refunds.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/004_review_cases.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/005_velocity_counters.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (reference, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.reference,
                entry.event_type,
                entry.payload,
                entry.created_at
            ],
        )?;
        Ok(())
    }

    pub fn append_engine_event(&self, event: &EngineEvent, now: i64) -> EngineResult<()> {
        self.append_event(&EventLogEntry {
            id: None,
            reference: event.reference().to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
            created_at: now,
        })
    }

    pub fn events_for_reference(&self, reference: &str) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, reference, event_type, payload, created_at
             FROM event_log WHERE reference = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![reference], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    reference: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Merchant settings ──────────────────────────────────────

    pub fn upsert_merchant_settings(
        &self,
        settings: &MerchantFraudSettings,
        now: i64,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO merchant_settings
                 (merchant_id, enabled, block_threshold, review_threshold, flag_threshold, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (merchant_id) DO UPDATE SET
                 enabled = excluded.enabled,
                 block_threshold = excluded.block_threshold,
                 review_threshold = excluded.review_threshold,
                 flag_threshold = excluded.flag_threshold,
                 updated_at = excluded.updated_at",
            params![
                settings.merchant_id,
                settings.enabled as i64,
                settings.block_threshold,
                settings.review_threshold,
                settings.flag_threshold,
                now
            ],
        )?;
        Ok(())
    }

    pub fn merchant_settings(
        &self,
        merchant_id: &str,
    ) -> EngineResult<Option<MerchantFraudSettings>> {
        let settings = self
            .conn
            .query_row(
                "SELECT merchant_id, enabled, block_threshold, review_threshold, flag_threshold
                 FROM merchant_settings WHERE merchant_id = ?1",
                params![merchant_id],
                |row| {
                    Ok(MerchantFraudSettings {
                        merchant_id: row.get(0)?,
                        enabled: row.get::<_, i64>(1)? != 0,
                        block_threshold: row.get(2)?,
                        review_threshold: row.get(3)?,
                        flag_threshold: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(settings)
    }
}
