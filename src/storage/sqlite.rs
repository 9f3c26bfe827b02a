use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{BlockInstance, PatternId, PatternInstance, PatternStatus};

use super::{PatternRepository, RepositoryError};

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Sqlite-backed pattern store: one `seed_pattern` row per pattern, block
/// list JSON-encoded in `block_features`.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, RepositoryError> {
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            pattern_id: row.get("pattern_id")?,
            ticker: row.get("ticker")?,
            root_block_id: row.get("root_block_id")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
            block_features: row.get("block_features")?,
        })
    }

    fn decode(raw: RawRow) -> Result<PatternInstance, RepositoryError> {
        let corrupt = |message: String| RepositoryError::Corrupt {
            id: raw.pattern_id.clone(),
            message,
        };

        let status = PatternStatus::parse(&raw.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", raw.status)))?;
        let created_at =
            parse_date(&raw.created_at).ok_or_else(|| corrupt("bad created_at".to_string()))?;
        let completed_at = raw
            .completed_at
            .as_deref()
            .map(|s| parse_date(s).ok_or_else(|| corrupt("bad completed_at".to_string())))
            .transpose()?;
        let blocks: Vec<BlockInstance> = serde_json::from_str(&raw.block_features)?;
        if blocks.is_empty() {
            return Err(corrupt("pattern row without blocks".to_string()));
        }

        Ok(PatternInstance {
            pattern_id: PatternId::from(raw.pattern_id),
            ticker: raw.ticker,
            root_block_id: raw.root_block_id,
            blocks,
            status,
            created_at,
            completed_at,
        })
    }
}

/// Column values exactly as stored, decoded into model types afterwards so
/// decoding failures surface as `Corrupt` rather than a database error.
struct RawRow {
    pattern_id: String,
    ticker: String,
    root_block_id: String,
    status: String,
    created_at: String,
    completed_at: Option<String>,
    block_features: String,
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

impl PatternRepository for SqliteRepository {
    fn save(&self, pattern: &PatternInstance) -> Result<(), RepositoryError> {
        let blocks = serde_json::to_string(&pattern.blocks)?;
        let conn = self.conn.lock().expect("repository mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO seed_pattern
             (pattern_id, ticker, root_block_id, status, created_at, completed_at,
              root_started_at, block_features)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                pattern.pattern_id.as_str(),
                pattern.ticker,
                pattern.root_block_id,
                pattern.status.as_str(),
                pattern.created_at.to_string(),
                pattern.completed_at.map(|d| d.to_string()),
                pattern.root().started_at.to_string(),
                blocks,
            ],
        )?;
        Ok(())
    }

    fn save_all(&self, patterns: &[PatternInstance]) -> Result<usize, RepositoryError> {
        {
            let mut conn = self.conn.lock().expect("repository mutex poisoned");
            let tx = conn.transaction()?;
            for pattern in patterns {
                let blocks = serde_json::to_string(&pattern.blocks)?;
                tx.execute(
                    "INSERT OR REPLACE INTO seed_pattern
                     (pattern_id, ticker, root_block_id, status, created_at, completed_at,
                      root_started_at, block_features)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        pattern.pattern_id.as_str(),
                        pattern.ticker,
                        pattern.root_block_id,
                        pattern.status.as_str(),
                        pattern.created_at.to_string(),
                        pattern.completed_at.map(|d| d.to_string()),
                        pattern.root().started_at.to_string(),
                        blocks,
                    ],
                )?;
            }
            tx.commit()?;
        }
        Ok(patterns.len())
    }

    fn find_by_id(&self, pattern_id: &str) -> Result<Option<PatternInstance>, RepositoryError> {
        let raw = {
            let conn = self.conn.lock().expect("repository mutex poisoned");
            conn.query_row(
                "SELECT * FROM seed_pattern WHERE pattern_id = ?1",
                params![pattern_id],
                Self::row_to_raw,
            )
            .optional()?
        };
        raw.map(Self::decode).transpose()
    }

    fn find_by_ticker(
        &self,
        ticker: &str,
        status: Option<PatternStatus>,
    ) -> Result<Vec<PatternInstance>, RepositoryError> {
        let rows = {
            let conn = self.conn.lock().expect("repository mutex poisoned");
            let mut rows = Vec::new();
            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM seed_pattern
                         WHERE ticker = ?1 AND status = ?2
                         ORDER BY pattern_id",
                    )?;
                    let found =
                        stmt.query_map(params![ticker, status.as_str()], Self::row_to_raw)?;
                    for row in found {
                        rows.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM seed_pattern WHERE ticker = ?1 ORDER BY pattern_id",
                    )?;
                    let found = stmt.query_map(params![ticker], Self::row_to_raw)?;
                    for row in found {
                        rows.push(row?);
                    }
                }
            }
            rows
        };
        rows.into_iter().map(Self::decode).collect()
    }

    fn find_by_date_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PatternInstance>, RepositoryError> {
        let rows = {
            let conn = self.conn.lock().expect("repository mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT * FROM seed_pattern
                 WHERE ticker = ?1 AND root_started_at >= ?2 AND root_started_at <= ?3
                 ORDER BY pattern_id",
            )?;
            let found = stmt.query_map(
                params![ticker, from.to_string(), to.to_string()],
                Self::row_to_raw,
            )?;
            let mut rows = Vec::new();
            for row in found {
                rows.push(row?);
            }
            rows
        };
        rows.into_iter().map(Self::decode).collect()
    }

    fn exists(&self, pattern_id: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("repository mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM seed_pattern WHERE pattern_id = ?1",
            params![pattern_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete(&self, pattern_id: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("repository mutex poisoned");
        let affected = conn.execute(
            "DELETE FROM seed_pattern WHERE pattern_id = ?1",
            params![pattern_id],
        )?;
        Ok(affected > 0)
    }
}
