//! SQLite persistence layer for position snapshots and trade history.
//!
//! Two tables survive restarts:
//! - `position_snapshots`: the structural subset of each open position,
//!   versioned JSON keyed by (account, symbol), upserted on debounced
//!   flushes and on shutdown.
//! - `trades`: one row per round trip. Inserted at open with NULL exit
//!   fields, updated exactly once at close with a non-null realized
//!   profit/loss. Open rows double as the fallback recovery source when a
//!   snapshot is missing or unreadable; closed rows are the append-only
//!   trade history queryable by time window.
//!
//! Writes are retried once; after that the error surfaces to the caller
//! and in-memory state remains authoritative until the next flush.

use crate::types::{AccountMode, ClosedTrade, OpenPosition, PositionSide, PositionSnapshot};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// One snapshot row as read back from disk. `snapshot` is `None` when the
/// stored payload could not be parsed.
#[derive(Debug)]
pub struct SnapshotRow {
    pub account: String,
    pub symbol: String,
    pub snapshot: Option<PositionSnapshot>,
}

/// SQLite store for snapshots and trade history.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS position_snapshots (
                account TEXT NOT NULL,
                symbol TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (account, symbol)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                point_value REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL,
                realized_pnl REAL,
                mae REAL,
                mfe REAL,
                entered_at INTEGER NOT NULL,
                exited_at INTEGER,
                mode TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_account ON trades(account)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_exited_at ON trades(exited_at DESC)",
            [],
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Snapshot Methods ==========

    /// Upsert the structural snapshot for a key. Retried once on failure.
    pub fn save_snapshot(&self, position: &OpenPosition) -> Result<(), rusqlite::Error> {
        let snapshot = PositionSnapshot::capture(position);
        let data = serde_json::to_string(&snapshot).unwrap_or_default();
        let version = snapshot.version.unwrap_or(0);
        let updated_at = position.updated_at.unwrap_or(0);

        self.with_retry("save_snapshot", |conn| {
            conn.execute(
                "INSERT INTO position_snapshots (account, symbol, version, updated_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(account, symbol) DO UPDATE SET
                    version = excluded.version,
                    updated_at = excluded.updated_at,
                    data = excluded.data",
                params![position.account, position.symbol, version, updated_at, data],
            )
            .map(|_| ())
        })
    }

    /// Store a pre-serialized snapshot payload for a key. Lets older-format
    /// payloads be written as-is (import tooling, compatibility tests).
    pub fn save_raw_snapshot(
        &self,
        account: &str,
        symbol: &str,
        version: u32,
        data: &str,
    ) -> Result<(), rusqlite::Error> {
        self.with_retry("save_raw_snapshot", |conn| {
            conn.execute(
                "INSERT INTO position_snapshots (account, symbol, version, updated_at, data)
                 VALUES (?1, ?2, ?3, 0, ?4)
                 ON CONFLICT(account, symbol) DO UPDATE SET
                    version = excluded.version,
                    data = excluded.data",
                params![account, symbol, version, data],
            )
            .map(|_| ())
        })
    }

    /// Remove the snapshot for a key (after its position closes).
    pub fn delete_snapshot(&self, account: &str, symbol: &str) -> Result<(), rusqlite::Error> {
        self.with_retry("delete_snapshot", |conn| {
            conn.execute(
                "DELETE FROM position_snapshots WHERE account = ?1 AND symbol = ?2",
                params![account, symbol],
            )
            .map(|_| ())
        })
    }

    /// All stored snapshots. Rows whose payload fails to parse are returned
    /// with `snapshot: None` so recovery can fall back per key.
    pub fn load_snapshots(&self) -> Vec<SnapshotRow> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = match conn.prepare(
            "SELECT account, symbol, data FROM position_snapshots ORDER BY account, symbol",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing snapshot query: {}", e);
                return Vec::new();
            }
        };

        let rows = stmt
            .query_map([], |row| {
                let account: String = row.get(0)?;
                let symbol: String = row.get(1)?;
                let data: String = row.get(2)?;
                Ok((account, symbol, data))
            })
            .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
            .unwrap_or_default();

        rows.into_iter()
            .map(|(account, symbol, data)| {
                let snapshot = match serde_json::from_str(&data) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!("Corrupt snapshot for {}/{}: {}", account, symbol, e);
                        None
                    }
                };
                SnapshotRow {
                    account,
                    symbol,
                    snapshot,
                }
            })
            .collect()
    }

    // ========== Trade History Methods ==========

    /// Insert the open half of a round trip. Exit fields stay NULL until
    /// the close lands. Skipped when the position lacks entry data.
    pub fn record_trade_open(
        &self,
        position: &OpenPosition,
        mode: AccountMode,
    ) -> Result<(), rusqlite::Error> {
        let (Some(side), Some(entry_price), Some(quantity), Some(entered_at)) = (
            position.side,
            position.entry_price,
            position.quantity,
            position.entered_at,
        ) else {
            debug!(
                "Not recording open trade for {}/{}: entry data incomplete",
                position.account, position.symbol
            );
            return Ok(());
        };

        self.with_retry("record_trade_open", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO trades
                 (id, account, symbol, side, quantity, point_value, entry_price, entered_at, mode)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    position.trade_id,
                    position.account,
                    position.symbol,
                    side.to_string(),
                    quantity,
                    position.point_value,
                    entry_price,
                    entered_at,
                    mode.to_string(),
                ],
            )
            .map(|_| ())
        })
    }

    /// Write the close half of a round trip. The realized profit/loss, MAE
    /// and MFE land in the same statement as the exit price, so a closed
    /// row can never carry an unset result. If the open row is missing
    /// (recovered position whose open predates the database), the full row
    /// is inserted instead.
    pub fn record_trade_close(&self, trade: &ClosedTrade) -> Result<(), rusqlite::Error> {
        self.with_retry("record_trade_close", |conn| {
            let updated = conn.execute(
                "UPDATE trades SET
                    quantity = ?2,
                    entry_price = ?3,
                    exit_price = ?4,
                    realized_pnl = ?5,
                    mae = ?6,
                    mfe = ?7,
                    exited_at = ?8
                 WHERE id = ?1 AND exit_price IS NULL",
                params![
                    trade.id,
                    trade.quantity,
                    trade.entry_price,
                    trade.exit_price,
                    trade.realized_pnl,
                    trade.mae,
                    trade.mfe,
                    trade.exited_at,
                ],
            )?;

            if updated == 0 {
                conn.execute(
                    "INSERT OR IGNORE INTO trades
                     (id, account, symbol, side, quantity, point_value, entry_price,
                      exit_price, realized_pnl, mae, mfe, entered_at, exited_at, mode)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    params![
                        trade.id,
                        trade.account,
                        trade.symbol,
                        trade.side.to_string(),
                        trade.quantity,
                        trade.point_value,
                        trade.entry_price,
                        trade.exit_price,
                        trade.realized_pnl,
                        trade.mae,
                        trade.mfe,
                        trade.entered_at,
                        trade.exited_at,
                        trade.mode.to_string(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Most recent still-open trade row for a key, rebuilt as a position.
    /// Used when a snapshot is missing or unreadable.
    pub fn load_open_trade(&self, account: &str, symbol: &str) -> Option<OpenPosition> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            "SELECT id, side, quantity, point_value, entry_price, entered_at
             FROM trades
             WHERE account = ?1 AND symbol = ?2 AND exit_price IS NULL
             ORDER BY entered_at DESC
             LIMIT 1",
            params![account, symbol],
            |row| {
                let id: String = row.get(0)?;
                let side: String = row.get(1)?;
                let quantity: f64 = row.get(2)?;
                let point_value: f64 = row.get(3)?;
                let entry_price: f64 = row.get(4)?;
                let entered_at: i64 = row.get(5)?;
                Ok((id, side, quantity, point_value, entry_price, entered_at))
            },
        );

        match result {
            Ok((id, side, quantity, point_value, entry_price, entered_at)) => {
                let side = parse_side(&side)?;
                Some(OpenPosition::open(
                    id,
                    account.to_string(),
                    symbol.to_string(),
                    side,
                    entry_price,
                    quantity,
                    point_value,
                    entered_at,
                ))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                error!("Error loading open trade for {}/{}: {}", account, symbol, e);
                None
            }
        }
    }

    /// Keys that still have an open trade row. Recovery uses these to find
    /// positions that never got a snapshot.
    pub fn open_trade_keys(&self) -> Vec<(String, String)> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = match conn.prepare(
            "SELECT DISTINCT account, symbol FROM trades WHERE exit_price IS NULL",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing open trade keys query: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Closed trades, newest first, optionally filtered by account and
    /// close-time window. The analytics query surface.
    pub fn closed_trades(
        &self,
        account: Option<&str>,
        since: Option<i64>,
        until: Option<i64>,
        limit: usize,
    ) -> Vec<ClosedTrade> {
        let conn = self.conn.lock().unwrap();

        let query = "SELECT id, account, symbol, side, quantity, point_value, entry_price,
                            exit_price, realized_pnl, mae, mfe, entered_at, exited_at, mode
                     FROM trades
                     WHERE exit_price IS NOT NULL
                       AND (?1 IS NULL OR account = ?1)
                       AND (?2 IS NULL OR exited_at >= ?2)
                       AND (?3 IS NULL OR exited_at <= ?3)
                     ORDER BY exited_at DESC
                     LIMIT ?4";

        let mut stmt = match conn.prepare(query) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing closed trades query: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map(params![account, since, until, limit as i64], |row| {
            let side: String = row.get(3)?;
            let mode: String = row.get(13)?;
            Ok(ClosedTrade {
                id: row.get(0)?,
                account: row.get(1)?,
                symbol: row.get(2)?,
                side: parse_side(&side).unwrap_or(PositionSide::Long),
                quantity: row.get(4)?,
                point_value: row.get(5)?,
                entry_price: row.get(6)?,
                exit_price: row.get(7)?,
                realized_pnl: row.get(8)?,
                mae: row.get(9)?,
                mfe: row.get(10)?,
                entered_at: row.get(11)?,
                exited_at: row.get(12)?,
                mode: parse_mode(&mode),
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    /// Total closed trades on record.
    pub fn closed_trade_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE exit_price IS NOT NULL",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    /// Run a write, retrying once before surfacing the error.
    fn with_retry<T, F>(&self, op: &str, f: F) -> Result<T, rusqlite::Error>
    where
        F: Fn(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().unwrap();
        match f(&conn) {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!("{} failed, retrying once: {}", op, first);
                f(&conn).map_err(|e| {
                    error!("{} failed after retry: {}", op, e);
                    e
                })
            }
        }
    }
}

fn parse_side(s: &str) -> Option<PositionSide> {
    match s {
        "long" => Some(PositionSide::Long),
        "short" => Some(PositionSide::Short),
        _ => None,
    }
}

fn parse_mode(s: &str) -> AccountMode {
    match s {
        "sim" => AccountMode::Sim,
        _ => AccountMode::Live,
    }
}
