//! Escrow Database
//!
//! SQLite-backed store shared by every transition of the escrow engine.
//!
//! - WAL mode so readers never block the single writer
//! - `BEGIN IMMEDIATE` atomic units: the write lock is taken before the first read,
//!   so read → validate → mutate runs serialized against every other writer
//! - Lock contention is retried from the top of the unit, then surfaced as
//!   `TransientConflict`
//! - Ledger rows are append-only at the storage layer (triggers abort UPDATE/DELETE)

use parking_lot::Mutex; // Faster than std::sync::Mutex
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row, Transaction, TransactionBehavior};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    role TEXT NOT NULL DEFAULT 'USER',
    balance_cents INTEGER NOT NULL DEFAULT 0 CHECK (balance_cents >= 0),
    wins INTEGER NOT NULL DEFAULT 0 CHECK (wins >= 0),
    losses INTEGER NOT NULL DEFAULT 0 CHECK (losses >= 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY,
    game TEXT NOT NULL,
    entry_fee_cents INTEGER NOT NULL CHECK (entry_fee_cents BETWEEN 0 AND 4611686018427387903),
    status TEXT NOT NULL DEFAULT 'WAITING',
    created_by_id TEXT NOT NULL,
    joined_by_id TEXT,
    winner_id TEXT,
    prize_cents INTEGER,
    commission_cents INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (created_by_id) REFERENCES users(id),
    FOREIGN KEY (joined_by_id) REFERENCES users(id),
    FOREIGN KEY (winner_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_matches_created_at ON matches(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    match_id TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('ENTRY_FEE', 'WIN_PAYOUT')),
    amount_cents INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (match_id) REFERENCES matches(id)
);

CREATE INDEX IF NOT EXISTS idx_ledger_user ON ledger_entries(user_id, id);
CREATE INDEX IF NOT EXISTS idx_ledger_match ON ledger_entries(match_id, id);

-- At most one payout per match
CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_single_payout
    ON ledger_entries(match_id) WHERE type = 'WIN_PAYOUT';

CREATE TRIGGER IF NOT EXISTS ledger_entries_no_update
    BEFORE UPDATE ON ledger_entries
BEGIN
    SELECT RAISE(ABORT, 'ledger entries are immutable');
END;

CREATE TRIGGER IF NOT EXISTS ledger_entries_no_delete
    BEFORE DELETE ON ledger_entries
BEGIN
    SELECT RAISE(ABORT, 'ledger entries are immutable');
END;

CREATE TABLE IF NOT EXISTS platform_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    default_entry_fee_cents INTEGER NOT NULL CHECK (default_entry_fee_cents >= 0),
    commission_bps INTEGER NOT NULL CHECK (commission_bps BETWEEN 0 AND 10000),
    updated_at TEXT NOT NULL
);
"#;

/// Idle connections kept around between calls
const MAX_IDLE_CONNECTIONS: usize = 8;

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// How long a connection waits on SQLite's write lock before reporting busy
    pub busy_timeout: Duration,
    /// Extra attempts for an atomic unit that lost a lock race
    pub conflict_retries: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            conflict_retries: 3,
        }
    }
}

/// Shared handle to the escrow database
pub struct Database {
    db_path: String,
    options: DatabaseOptions,
    idle: Mutex<Vec<Connection>>,
}

impl Database {
    /// Open (or create) the database and initialize the schema
    pub fn open(db_path: &str, options: DatabaseOptions) -> EngineResult<Self> {
        let db = Self {
            db_path: db_path.to_string(),
            options,
            idle: Mutex::new(Vec::new()),
        };

        let conn = db.connect()?;
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        db.idle.lock().push(conn);
        info!("📊 Escrow database initialized at: {}", db_path);
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn connect(&self) -> EngineResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // Each connection is used by one thread at a time

        let conn = Connection::open_with_flags(&self.db_path, flags)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn checkout(&self) -> EngineResult<PooledConnection<'_>> {
        let pooled = self.idle.lock().pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.connect()?,
        };
        Ok(PooledConnection {
            db: self,
            conn: Some(conn),
        })
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    /// Run `body` as one all-or-nothing unit.
    ///
    /// Commits only when `body` returns `Ok`; any error rolls back every write made
    /// inside it. `body` may run more than once if the unit loses a lock race, so it
    /// must derive everything it does from what it reads through `tx`.
    pub fn atomic<T, F>(&self, mut body: F) -> EngineResult<T>
    where
        F: FnMut(&Transaction<'_>) -> EngineResult<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.run_once(&mut body) {
                Err(e) if e.is_lock_contention() => {
                    if attempt >= self.options.conflict_retries {
                        warn!(attempts = attempt + 1, error = %e, "⚠️ Atomic unit gave up after lock contention");
                        return Err(EngineError::TransientConflict);
                    }
                    attempt += 1;
                    debug!(attempt, error = %e, "Retrying atomic unit from read");
                    std::thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                }
                other => return other,
            }
        }
    }

    fn run_once<T, F>(&self, body: &mut F) -> EngineResult<T>
    where
        F: FnMut(&Transaction<'_>) -> EngineResult<T>,
    {
        let mut conn = self.checkout()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = body(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a read-only query on a pooled connection
    pub fn read<T, F>(&self, query: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T>,
    {
        let conn = self.checkout()?;
        query(&conn)
    }
}

struct PooledConnection<'a> {
    db: &'a Database,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.db.checkin(conn);
        }
    }
}

/// Read a TEXT column holding a UUID
pub(crate) fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
