//! SQLite row store holding the latest version of every event.
//!
//! One row per event id in `telemetry_events`; re-ingesting an id replaces
//! the previous row. Every flush runs in a single transaction on a blocking
//! thread.

use crate::error::{Result, WriterError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telemetry2store_core::TelemetryRow;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS telemetry_events (
    id TEXT PRIMARY KEY,
    domain TEXT,
    reason TEXT,
    source TEXT,
    policy_version TEXT,
    risk_score REAL NOT NULL,
    hashed_user_id TEXT,
    client_ip TEXT,
    user_agent TEXT,
    timestamp TEXT NOT NULL
)";

const UPSERT_SQL: &str = "INSERT OR REPLACE INTO telemetry_events \
    (id, domain, reason, source, policy_version, risk_score, hashed_user_id, client_ip, user_agent, timestamp) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const SELECT_SQL: &str = "SELECT id, domain, reason, source, policy_version, risk_score, \
    hashed_user_id, client_ip, user_agent, timestamp FROM telemetry_events WHERE id = ?1";

#[derive(Clone)]
pub struct RowStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl RowStore {
    /// Open (creating if needed) the database file and its parent directory.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| WriterError::row_store_unavailable(path, e.to_string()))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| WriterError::row_store_unavailable(path, e.to_string()))?;
        init_connection(&conn).map_err(|e| WriterError::row_store_unavailable(path, e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace `rows` in one transaction. Later rows with the same
    /// id win over earlier ones.
    pub async fn upsert(&self, rows: Vec<TelemetryRow>) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            upsert_rows(&mut guard, &rows)
        })
        .await
        .map_err(|e| WriterError::write_failure(format!("row store task failed: {}", e)))?
        .map_err(|e| WriterError::write_failure(format!("row store upsert failed: {}", e)))
    }

    /// Number of rows currently stored.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM telemetry_events", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n.max(0) as u64)
        .map_err(|e| WriterError::write_failure(format!("row store count failed: {}", e)))
    }

    /// Fetch one row by id.
    pub fn get(&self, id: &str) -> Result<Option<TelemetryRow>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(SELECT_SQL, params![id], |row| {
                Ok((
                    TelemetryRow {
                        id: row.get(0)?,
                        domain: row.get(1)?,
                        reason: row.get(2)?,
                        source: row.get(3)?,
                        policy_version: row.get(4)?,
                        risk_score: row.get(5)?,
                        hashed_user_id: row.get(6)?,
                        client_ip: row.get(7)?,
                        user_agent: row.get(8)?,
                        timestamp: DateTime::<Utc>::UNIX_EPOCH,
                    },
                    row.get::<_, String>(9)?,
                ))
            })
            .optional()
            .map_err(|e| WriterError::write_failure(format!("row store lookup failed: {}", e)))?;

        raw.map(|(mut row, timestamp)| {
            row.timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| {
                    WriterError::write_failure(format!(
                        "stored timestamp '{}' for '{}' is invalid: {}",
                        timestamp, row.id, e
                    ))
                })?
                .with_timezone(&Utc);
            Ok(row)
        })
        .transpose()
    }
}

fn init_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(CREATE_TABLE_SQL)?;
    Ok(())
}

fn upsert_rows(conn: &mut Connection, rows: &[TelemetryRow]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
        for row in rows {
            stmt.execute(params![
                row.id,
                row.domain,
                row.reason,
                row.source,
                row.policy_version,
                row.risk_score,
                row.hashed_user_id,
                row.client_ip,
                row.user_agent,
                row.timestamp_text(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}
