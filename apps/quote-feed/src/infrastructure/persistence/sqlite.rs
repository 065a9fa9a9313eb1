//! SQLite tick store.
//!
//! One row per symbol in `cached_quotes`. Prices are stored as decimal text
//! to avoid float rounding; timestamps as Unix milliseconds, so sub-millisecond
//! precision is dropped on write. Statements run on the blocking pool.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use tracing::info;

use crate::application::ports::{StoreError, TickStore};
use crate::domain::streaming::CachedQuote;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cached_quotes (
    symbol        TEXT PRIMARY KEY,
    bid           TEXT NULL,
    ask           TEXT NULL,
    last          TEXT NULL,
    volume        TEXT NULL,
    source        TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cached_quotes_updated_at
    ON cached_quotes (updated_at_ms);
";

const UPSERT: &str = "
INSERT INTO cached_quotes (symbol, bid, ask, last, volume, source, updated_at_ms)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(symbol) DO UPDATE SET
    bid = excluded.bid,
    ask = excluded.ask,
    last = excluded.last,
    volume = excluded.volume,
    source = excluded.source,
    updated_at_ms = excluded.updated_at_ms
";

const SELECT_COLUMNS: &str =
    "SELECT symbol, bid, ask, last, volume, source, updated_at_ms FROM cached_quotes";

/// SQLite-backed `TickStore`.
#[derive(Clone)]
pub struct SqliteTickStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteTickStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTickStore").finish_non_exhaustive()
    }
}

impl SqliteTickStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(unavailable)?;
        info!(path = %path.display(), "Opened SQLite tick store");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || op(&conn.lock()))
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("blocking task failed: {e}"),
            })?
    }
}

#[async_trait]
impl TickStore for SqliteTickStore {
    async fn upsert(&self, quote: CachedQuote) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                UPSERT,
                params![
                    quote.symbol,
                    quote.bid.map(|d| d.to_string()),
                    quote.ask.map(|d| d.to_string()),
                    quote.last.map(|d| d.to_string()),
                    quote.volume.map(|d| d.to_string()),
                    quote.source,
                    quote.updated_at.timestamp_millis(),
                ],
            )
            .map_err(query)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, symbol: &str) -> Result<Option<CachedQuote>, StoreError> {
        let symbol = symbol.to_string();
        self.run(move |conn| {
            let raw = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE symbol = ?1"),
                    params![symbol],
                    RawRow::from_row,
                )
                .optional()
                .map_err(query)?;
            raw.map(RawRow::into_quote).transpose()
        })
        .await
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CachedQuote>, StoreError> {
        let cutoff_ms = ceil_millis(cutoff);
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_COLUMNS} WHERE updated_at_ms >= ?1 ORDER BY updated_at_ms DESC"
                ))
                .map_err(query)?;
            let rows = stmt
                .query_map(params![cutoff_ms], RawRow::from_row)
                .map_err(query)?;

            rows.map(|row| row.map_err(query).and_then(RawRow::into_quote))
                .collect()
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff_ms = ceil_millis(cutoff);
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM cached_quotes WHERE updated_at_ms < ?1",
                params![cutoff_ms],
            )
            .map_err(query)
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.run(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM cached_quotes", [], |row| row.get(0))
                .map_err(query)?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

struct RawRow {
    symbol: String,
    bid: Option<String>,
    ask: Option<String>,
    last: Option<String>,
    volume: Option<String>,
    source: String,
    updated_at_ms: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            symbol: row.get(0)?,
            bid: row.get(1)?,
            ask: row.get(2)?,
            last: row.get(3)?,
            volume: row.get(4)?,
            source: row.get(5)?,
            updated_at_ms: row.get(6)?,
        })
    }

    fn into_quote(self) -> Result<CachedQuote, StoreError> {
        let symbol = self.symbol;
        let decimal = |field: Option<String>| -> Result<Option<Decimal>, StoreError> {
            field
                .map(|s| Decimal::from_str(&s))
                .transpose()
                .map_err(|e| StoreError::Corrupt {
                    symbol: symbol.clone(),
                    message: e.to_string(),
                })
        };

        let bid = decimal(self.bid)?;
        let ask = decimal(self.ask)?;
        let last = decimal(self.last)?;
        let volume = decimal(self.volume)?;
        let updated_at = DateTime::from_timestamp_millis(self.updated_at_ms).ok_or_else(|| {
            StoreError::Corrupt {
                symbol: symbol.clone(),
                message: format!("timestamp out of range: {}", self.updated_at_ms),
            }
        })?;

        Ok(CachedQuote {
            symbol,
            bid,
            ask,
            last,
            volume,
            source: self.source,
            updated_at,
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
/// Smallest whole millisecond not before `at`. Rows hold whole milliseconds,
/// so `updated_at_ms >= ceil_millis(cutoff)` matches `updated_at >= cutoff`.
fn ceil_millis(at: DateTime<Utc>) -> i64 {
    let floor = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        floor
    } else {
        floor.saturating_add(1)
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable {
        message: err.to_string(),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn query(err: rusqlite::Error) -> StoreError {
    StoreError::Query {
        message: err.to_string(),
    }
}
