//! SQLite Database
//!
//! Durable system-of-record for analysis results, write markers and chat
//! turns, using rusqlite with r2d2 connection pooling. A single database file
//! may be shared by several execution contexts; each write is tagged with the
//! writer's context id and a global revision so other contexts can observe it.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use insight_sync_core::{AnalysisResult, InsightKind, InsightPayload, Origin, PeriodKey, Scope};

use crate::models::transcript::{Turn, TurnRole};
use crate::services::cache::durable::{DurableChange, DurableRecord, DurableStore, WriteMarker};
use crate::storage::transcript::TranscriptStore;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Raw insight row from the database
#[derive(Debug, Clone)]
struct InsightRow {
    user_id: String,
    period_key: String,
    kind: String,
    payload: String,
    origin: String,
    computed_at: String,
    writer_context: String,
    revision: i64,
}

impl InsightRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            period_key: row.get(1)?,
            kind: row.get(2)?,
            payload: row.get(3)?,
            origin: row.get(4)?,
            computed_at: row.get(5)?,
            writer_context: row.get(6)?,
            revision: row.get(7)?,
        })
    }

    fn into_record(self) -> AppResult<DurableRecord> {
        let scope = Scope::new(self.user_id, PeriodKey::parse(&self.period_key)?)?;
        let payload: InsightPayload = serde_json::from_str(&self.payload)?;
        let origin: Origin = self.origin.parse()?;
        let computed_at = parse_timestamp(&self.computed_at)?;
        if payload.kind().as_str() != self.kind {
            return Err(AppError::database(format!(
                "Row kind {} does not match payload kind {}",
                self.kind,
                payload.kind()
            )));
        }
        Ok(DurableRecord {
            result: AnalysisResult::new(scope, payload, origin, computed_at),
            writer_context: self.writer_context,
            revision: self.revision,
        })
    }
}

const INSIGHT_COLUMNS: &str =
    "user_id, period_key, kind, payload, origin, computed_at, writer_context, revision";

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Invalid timestamp {}: {}", raw, e)))
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool) -> AppResult<Self> {
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// Uses an in-memory SQLite database with the same schema as the
    /// production database. Clones share the single pooled connection, so
    /// several engines built on one in-memory database behave like separate
    /// execution contexts over a shared durable tier.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool)
    }

    /// Create a new database instance at the default location
    pub fn new() -> AppResult<Self> {
        Self::open(&database_path()?)
    }

    /// Open (or create) a database file with connection pooling
    pub fn open(db_path: &Path) -> AppResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool)
    }

    fn conn(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.conn()?;

        // One current result per (user, period, kind)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS insight_results (
                user_id TEXT NOT NULL,
                period_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                origin TEXT NOT NULL,
                computed_at TEXT NOT NULL,
                writer_context TEXT NOT NULL,
                revision INTEGER NOT NULL,
                PRIMARY KEY (user_id, period_key, kind)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_insight_results_revision
             ON insight_results(revision)",
            [],
        )?;

        // Most recent write per user, drives forced freshness
        conn.execute(
            "CREATE TABLE IF NOT EXISTS write_markers (
                user_id TEXT PRIMARY KEY,
                written_at TEXT NOT NULL,
                writer_context TEXT NOT NULL
            )",
            [],
        )?;

        // Conversation transcript
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                day TEXT NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                model TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_turns_user_day
             ON chat_turns(user_id, day)",
            [],
        )?;

        Ok(())
    }

    /// Check if the database is healthy
    pub fn is_healthy(&self) -> bool {
        match self.conn() {
            Ok(conn) => conn.execute_batch("SELECT 1").is_ok(),
            Err(_) => false,
        }
    }
}

impl DurableStore for Database {
    fn get(&self, kind: InsightKind, scope: &Scope) -> AppResult<Option<DurableRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM insight_results
                     WHERE user_id = ?1 AND period_key = ?2 AND kind = ?3",
                    INSIGHT_COLUMNS
                ),
                params![scope.user_id, scope.period.as_str(), kind.as_str()],
                InsightRow::from_row,
            )
            .optional()?;
        drop(conn);
        row.map(InsightRow::into_record).transpose()
    }

    fn put(&self, result: &AnalysisResult, writer_context: &str) -> AppResult<i64> {
        let payload = serde_json::to_string(&result.payload)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO insight_results
                (user_id, period_key, kind, payload, origin, computed_at, writer_context, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                (SELECT COALESCE(MAX(revision), 0) + 1 FROM insight_results))
             ON CONFLICT(user_id, period_key, kind) DO UPDATE SET
                payload = excluded.payload,
                origin = excluded.origin,
                computed_at = excluded.computed_at,
                writer_context = excluded.writer_context,
                revision = excluded.revision",
            params![
                result.scope.user_id,
                result.scope.period.as_str(),
                result.kind().as_str(),
                payload,
                result.origin.as_str(),
                result.computed_at.to_rfc3339(),
                writer_context,
            ],
        )?;
        let revision: i64 = conn.query_row(
            "SELECT revision FROM insight_results
             WHERE user_id = ?1 AND period_key = ?2 AND kind = ?3",
            params![
                result.scope.user_id,
                result.scope.period.as_str(),
                result.kind().as_str()
            ],
            |row| row.get(0),
        )?;
        Ok(revision)
    }

    fn list_days(
        &self,
        user_id: &str,
        kind: InsightKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AnalysisResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM insight_results
             WHERE user_id = ?1 AND kind = ?2 AND period_key >= ?3 AND period_key <= ?4
             ORDER BY period_key ASC",
            INSIGHT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![user_id, kind.as_str(), day_key(from), day_key(to)],
                InsightRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        // Only day-keyed periods belong in a day series
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            if NaiveDate::parse_from_str(&row.period_key, "%Y-%m-%d").is_err() {
                continue;
            }
            results.push(row.into_record()?.result);
        }
        Ok(results)
    }

    fn latest_revision(&self) -> AppResult<i64> {
        let conn = self.conn()?;
        let revision: i64 = conn.query_row(
            "SELECT COALESCE(MAX(revision), 0) FROM insight_results",
            [],
            |row| row.get(0),
        )?;
        Ok(revision)
    }

    fn changes_since(&self, revision: i64, exclude_writer: &str) -> AppResult<Vec<DurableChange>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, period_key, kind, writer_context, revision
             FROM insight_results
             WHERE revision > ?1
             ORDER BY revision ASC",
        )?;
        let rows = stmt
            .query_map(params![revision], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut changes = Vec::new();
        for (user_id, period_key, kind, writer, rev) in rows {
            let kind: InsightKind = kind.parse()?;
            changes.push(DurableChange {
                scope: Scope::new(user_id, PeriodKey::parse(&period_key)?)?,
                kind,
                foreign: writer != exclude_writer,
                revision: rev,
            });
        }
        Ok(changes)
    }

    fn record_write_marker(&self, user_id: &str, at: DateTime<Utc>, writer_context: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO write_markers (user_id, written_at, writer_context)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                written_at = excluded.written_at,
                writer_context = excluded.writer_context",
            params![user_id, at.to_rfc3339(), writer_context],
        )?;
        Ok(())
    }

    fn write_marker(&self, user_id: &str) -> AppResult<Option<WriteMarker>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT written_at, writer_context FROM write_markers WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        drop(conn);
        match row {
            Some((written_at, writer_context)) => Ok(Some(WriteMarker {
                written_at: parse_timestamp(&written_at)?,
                writer_context,
            })),
            None => Ok(None),
        }
    }
}

impl TranscriptStore for Database {
    fn append(&self, user_id: &str, day: NaiveDate, turn: &Turn) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO chat_turns (user_id, day, role, text, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                day_key(day),
                turn.role.as_str(),
                turn.text,
                turn.model,
                turn.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list(&self, user_id: &str, day: NaiveDate) -> AppResult<Vec<Turn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT role, text, model, created_at FROM chat_turns
             WHERE user_id = ?1 AND day = ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id, day_key(day)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(role, text, model, created_at)| {
                Ok(Turn {
                    role: role.parse::<TurnRole>()?,
                    text,
                    model,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}
