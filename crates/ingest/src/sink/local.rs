//! SQLite-backed sink.

use super::{Sink, SinkError};
use async_trait::async_trait;
use resultsync_bundle_schema::{IdentifierSnapshot, UploadReport};
use rusqlite::{params, Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS test_result_containers (
        identifier       TEXT PRIMARY KEY,
        short_identifier TEXT NOT NULL,
        date             TEXT,
        report           TEXT NOT NULL,
        pcap_dump        TEXT NOT NULL,
        keylog           TEXT NOT NULL,
        ingested_at      TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_trc_date ON test_result_containers(date);
";

/// Stores bundles in an embedded SQLite database.
///
/// The identifier is the primary key, so a second upload of the same bundle
/// is rejected with [`SinkError::Duplicate`].
pub struct LocalSink {
    conn: Arc<Mutex<Connection>>,
    location: PathBuf,
}

impl LocalSink {
    /// Open (or create) the database file.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let conn = Connection::open(path).map_err(|e| SinkError::Storage(e.to_string()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(|e| SinkError::Storage(e.to_string()))?;
        Self::init(conn, path.to_path_buf())
    }

    /// Throwaway database for tests.
    pub fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory().map_err(|e| SinkError::Storage(e.to_string()))?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, location: PathBuf) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    /// Number of stored bundles.
    pub fn count(&self) -> Result<usize, SinkError> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM test_result_containers", [], |row| {
                row.get(0)
            })
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        Ok(count as usize)
    }

    /// Stored result document for an identifier.
    pub fn report(&self, identifier: &str) -> Result<Option<serde_json::Value>, SinkError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare("SELECT report FROM test_result_containers WHERE identifier = ?1")
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        let mut rows = stmt
            .query(params![identifier])
            .map_err(|e| SinkError::Storage(e.to_string()))?;

        match rows.next().map_err(|e| SinkError::Storage(e.to_string()))? {
            Some(row) => {
                let text: String = row.get(0).map_err(|e| SinkError::Storage(e.to_string()))?;
                let value = serde_json::from_str(&text)
                    .map_err(|e| SinkError::Storage(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Run a blocking database call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SinkError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SinkError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await
        .map_err(|e| SinkError::Storage(format!("database task failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, SinkError> {
    conn.lock()
        .map_err(|_| SinkError::Storage("database connection lock poisoned".into()))
}

fn classify(e: rusqlite::Error, identifier: &str) -> SinkError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::ConstraintViolation => SinkError::Duplicate(identifier.to_string()),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => SinkError::Busy(e.to_string()),
            _ => SinkError::Storage(e.to_string()),
        },
        _ => SinkError::Storage(e.to_string()),
    }
}

#[async_trait]
impl Sink for LocalSink {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.location.display())
    }

    async fn list_identifiers(&self) -> Result<IdentifierSnapshot, SinkError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT identifier FROM test_result_containers")
                .map_err(|e| SinkError::Storage(e.to_string()))?;
            let identifiers = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| SinkError::Storage(e.to_string()))?
                .collect::<Result<IdentifierSnapshot, _>>()
                .map_err(|e| SinkError::Storage(e.to_string()))?;
            Ok(identifiers)
        })
        .await
    }

    async fn upload(&self, report: &UploadReport) -> Result<(), SinkError> {
        let identifier = report
            .identifier()
            .ok_or_else(|| SinkError::InvalidPayload("result document has no Identifier".into()))?
            .to_string();
        let short_identifier = report.short_identifier().unwrap_or_default().to_string();
        let date = report.date().map(str::to_string);
        let document = serde_json::to_string(&report.test_report)
            .map_err(|e| SinkError::InvalidPayload(e.to_string()))?;
        let pcap_dump = report.pcap_dump.clone();
        let keylog = report.keylog.clone();
        let ingested_at = chrono::Utc::now().to_rfc3339();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO test_result_containers (
                    identifier, short_identifier, date, report, pcap_dump, keylog, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    identifier,
                    short_identifier,
                    date,
                    document,
                    pcap_dump,
                    keylog,
                    ingested_at
                ],
            )
            .map_err(|e| classify(e, &identifier))?;
            debug!(identifier = %identifier, "Stored result container");
            Ok(())
        })
        .await
    }
}
