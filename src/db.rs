use std::path::Path;

use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::warn;

use crate::error::PersistenceError;
use crate::parser::extract::ExtractedRecord;

pub type StoreResult<T> = Result<T, PersistenceError>;

/// Write side used by the import pipeline.
pub trait Store {
    /// Append an observation; never deduplicates.
    fn append_history(&self, rec: &ExtractedRecord) -> StoreResult<i64>;
    /// Replace whatever chart row holds `(date, upper(entity))`.
    fn upsert_chart(&self, rec: &ExtractedRecord) -> StoreResult<i64>;
    /// Drop every chart row tagged with `source`.
    fn clear_by_source(&self, source: &str) -> StoreResult<usize>;
    /// Most recent history row of every entity, newest first.
    fn latest_per_entity(&self) -> StoreResult<Vec<HistoryRow>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub entity: String,
    pub value: String,
    pub time_of_day: String,
    pub date: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartRow {
    pub id: i64,
    pub date: String,
    pub entity: String,
    pub value: String,
    pub source: String,
}

pub struct Stats {
    pub history: usize,
    pub entities: usize,
    pub charts: usize,
    pub chart_sources: usize,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Failed to create {:?}: {}", dir, e);
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    // ── Reads ──

    pub fn list_history(&self, limit: usize) -> StoreResult<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, game, result, result_time, date, source
             FROM results ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_charts(&self, limit: usize) -> StoreResult<Vec<ChartRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chart_date, game, result, source
             FROM charts ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], chart_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_history(&self, id: i64) -> StoreResult<Option<HistoryRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, game, result, result_time, date, source FROM results WHERE id = ?1",
                params![id],
                history_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn stats(&self) -> StoreResult<Stats> {
        let count = |sql: &str| -> StoreResult<usize> { Ok(self.conn.query_row(sql, [], |r| r.get(0))?) };
        Ok(Stats {
            history: count("SELECT COUNT(*) FROM results")?,
            entities: count("SELECT COUNT(DISTINCT game) FROM results")?,
            charts: count("SELECT COUNT(*) FROM charts")?,
            chart_sources: count("SELECT COUNT(DISTINCT source) FROM charts")?,
        })
    }

    // ── Admin ──

    pub fn update_history(&self, id: i64, rec: &ExtractedRecord) -> StoreResult<bool> {
        check_persistable(rec)?;
        let changed = self.conn.execute(
            "UPDATE results SET game = ?1, result = ?2, result_time = ?3, date = ?4, source = ?5
             WHERE id = ?6",
            params![
                rec.entity.trim(),
                rec.value.trim(),
                rec.time_of_day,
                normalize_date(&rec.date),
                rec.source_id,
                id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_history(&self, id: i64) -> StoreResult<bool> {
        let changed = self.conn.execute("DELETE FROM results WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn clear_all_charts(&self) -> StoreResult<usize> {
        Ok(self.conn.execute("DELETE FROM charts", [])?)
    }
}

impl Store for SqliteStore {
    fn append_history(&self, rec: &ExtractedRecord) -> StoreResult<i64> {
        check_persistable(rec)?;
        self.conn.execute(
            "INSERT INTO results (game, result, result_time, date, source) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rec.entity.trim(),
                rec.value.trim(),
                rec.time_of_day,
                normalize_date(&rec.date),
                rec.source_id
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn upsert_chart(&self, rec: &ExtractedRecord) -> StoreResult<i64> {
        check_persistable(rec)?;
        // Atomic per key; `clear_by_source` before a batch of these is not.
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM charts WHERE chart_date = ?1 AND UPPER(game) = UPPER(?2)",
            params![normalize_date(&rec.date), rec.entity.trim()],
        )?;
        let id = insert_chart_row(&tx, rec)?;
        tx.commit()?;
        Ok(id)
    }

    fn clear_by_source(&self, source: &str) -> StoreResult<usize> {
        Ok(self.conn.execute("DELETE FROM charts WHERE source = ?1", params![source])?)
    }

    fn latest_per_entity(&self) -> StoreResult<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT r1.id, r1.game, r1.result, r1.result_time, r1.date, r1.source
             FROM results r1
             INNER JOIN (
                 SELECT game, MAX(id) AS maxid FROM results WHERE game IS NOT NULL GROUP BY game
             ) r2 ON r1.game = r2.game AND r1.id = r2.maxid
             ORDER BY r1.id DESC",
        )?;
        let rows = stmt
            .query_map([], history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS results (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            game        TEXT,
            result      TEXT,
            result_time TEXT,
            date        TEXT,
            source      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_results_game ON results(game);

        -- (chart_date, UPPER(game)) is kept unique by upsert_chart, not by the schema.
        CREATE TABLE IF NOT EXISTS charts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chart_date  TEXT,
            game        TEXT,
            result      TEXT,
            source      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_charts_date ON charts(chart_date);
        CREATE INDEX IF NOT EXISTS idx_charts_source ON charts(source);
        ",
    )?;
    Ok(())
}

fn insert_chart_row(conn: &Connection, rec: &ExtractedRecord) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO charts (chart_date, game, result, source) VALUES (?1, ?2, ?3, ?4)",
        params![
            normalize_date(&rec.date),
            rec.entity.trim(),
            rec.value.trim(),
            rec.source_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn check_persistable(rec: &ExtractedRecord) -> StoreResult<()> {
    if rec.entity.trim().is_empty() {
        return Err(PersistenceError::EmptyField("entity"));
    }
    if rec.value.trim().is_empty() {
        return Err(PersistenceError::EmptyField("value"));
    }
    Ok(())
}

/// Rewrite recognisable full dates to `YYYY-MM-DD`; leave anything else
/// (e.g. a bare `01-08` day label) as it came.
pub fn normalize_date(raw: &str) -> String {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y"];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .filter(|d| d.year() >= 1900)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn history_row(row: &Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get(0)?,
        entity: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        value: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        time_of_day: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        date: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        source: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

fn chart_row(row: &Row<'_>) -> rusqlite::Result<ChartRow> {
    Ok(ChartRow {
        id: row.get(0)?,
        date: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        entity: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        value: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        source: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
    })
}

// ── Tests ──
