//! SQLite connection pooling.

use std::path::Path;
use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::contract::StoreResult;

/// Pool of SQLite connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

/// One checked-out connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool sizing and timeout knobs.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size.
    pub max_size: u32,
    /// Checkout timeout.
    pub connection_timeout: Duration,
    /// `busy_timeout` handed to SQLite, in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout: Duration::from_secs(5),
            busy_timeout_ms: 5_000,
        }
    }
}

fn configure(conn: &Connection, busy_timeout_ms: u32) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};"
    ))
}

/// Open a pool over a database file.
pub fn new_file(path: &Path, config: &ConnectionConfig) -> StoreResult<ConnectionPool> {
    let busy_timeout_ms = config.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(path)
        .with_init(move |conn| configure(conn, busy_timeout_ms));
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size)
        .connection_timeout(config.connection_timeout)
        .build(manager)?;
    Ok(pool)
}

/// Open a pool over an in-memory database.
///
/// Sized to one connection — separate connections would each get their own
/// private in-memory database.
pub fn new_in_memory(config: &ConnectionConfig) -> StoreResult<ConnectionPool> {
    let busy_timeout_ms = config.busy_timeout_ms;
    let manager =
        SqliteConnectionManager::memory().with_init(move |conn| configure(conn, busy_timeout_ms));
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .connection_timeout(config.connection_timeout)
        .build(manager)?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
