use std::path::Path;
use std::thread;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::database::record::PredictionRecord;
use crate::database::schema::{self, KEY_ATTRIBUTE};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
    #[error("table '{table}' not ready after {attempts} polls")]
    TableNotReady { table: String, attempts: u32 },
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// Outcome of a write, in the shape the endpoint returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStatus {
    #[serde(rename = "StatusCode")]
    pub status_code: u16,
    #[serde(rename = "Message")]
    pub message: String,
}

impl SinkStatus {
    pub fn success() -> Self {
        Self {
            status_code: 200,
            message: "Success".to_string(),
        }
    }

    pub fn failure() -> Self {
        Self {
            status_code: 500,
            message: "Fail".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// Persists prediction records, one table per detection table name.
pub struct ResultSink {
    conn: Connection,
    poll_interval: Duration,
    max_polls: u32,
}

impl ResultSink {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            poll_interval: Duration::from_secs(3),
            max_polls: 20,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls.max(1);
        self
    }

    fn stored_name(table: &str) -> Result<String> {
        if !schema::is_valid_table_name(table) {
            return Err(SinkError::InvalidTableName(table.to_string()));
        }
        Ok(schema::stored_table_name(table))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let stored = Self::stored_name(table)?;
        self.stored_table_exists(&stored)
    }

    fn stored_table_exists(&self, stored: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                params![stored],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// A table is ready once it exists and carries the key column.
    fn table_ready(&self, stored: &str) -> Result<bool> {
        if !self.stored_table_exists(stored)? {
            return Ok(false);
        }
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info(\"{stored}\")"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns.iter().any(|c| c == KEY_ATTRIBUTE))
    }

    /// Creates `table` if absent and waits until it reports ready.
    pub fn ensure_table(&self, table: &str) -> Result<()> {
        let stored = Self::stored_name(table)?;
        if self.stored_table_exists(&stored)? {
            return Ok(());
        }

        info!("Creating table {}", table);
        self.conn.execute_batch(&schema::create_table_sql(&stored))?;

        for attempt in 1..=self.max_polls {
            if self.table_ready(&stored)? {
                debug!("Table {} ready after {} poll(s)", table, attempt);
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
        Err(SinkError::TableNotReady {
            table: table.to_string(),
            attempts: self.max_polls,
        })
    }

    /// Writes `record`, replacing any prior record for the same path.
    pub fn save(&self, table: &str, record: &PredictionRecord) -> Result<SinkStatus> {
        self.ensure_table(table)?;
        let written = self.conn.execute(
            &schema::upsert_sql(&schema::stored_table_name(table)),
            params![
                record.s3_path,
                record.predicted,
                record.probability,
                record.date_created_utc
            ],
        )?;
        debug!("Upserted {} row(s) for {} into {}", written, record.s3_path, table);

        Ok(if written == 1 {
            SinkStatus::success()
        } else {
            SinkStatus::failure()
        })
    }

    pub fn get(&self, table: &str, s3_path: &str) -> Result<Option<PredictionRecord>> {
        let stored = Self::stored_name(table)?;
        if !self.stored_table_exists(&stored)? {
            return Ok(None);
        }
        let record = self
            .conn
            .query_row(&schema::select_sql(&stored), params![s3_path], |row| {
                Ok(PredictionRecord {
                    s3_path: row.get(0)?,
                    predicted: row.get(1)?,
                    probability: row.get(2)?,
                    date_created_utc: row.get(3)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    pub fn count(&self, table: &str) -> Result<usize> {
        let stored = Self::stored_name(table)?;
        if !self.stored_table_exists(&stored)? {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(&schema::count_sql(&stored), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
