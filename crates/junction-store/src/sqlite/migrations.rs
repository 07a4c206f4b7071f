//! Schema migrations, versioned through `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::debug;

use crate::contract::StoreResult;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS streams (
    user_id     TEXT NOT NULL,
    id          TEXT NOT NULL,
    name        TEXT NOT NULL,
    parent_id   TEXT,
    trashed     INTEGER NOT NULL DEFAULT 0,
    deleted     TEXT,
    created     TEXT NOT NULL,
    created_by  TEXT NOT NULL,
    modified    TEXT NOT NULL,
    modified_by TEXT NOT NULL,
    PRIMARY KEY (user_id, id)
);

-- Sibling names are unique among live streams; tombstones keep the name
-- reusable. COALESCE folds root siblings (NULL parent) into one bucket.
CREATE UNIQUE INDEX IF NOT EXISTS idx_streams_sibling_name
    ON streams (user_id, COALESCE(parent_id, ''), name)
    WHERE deleted IS NULL;

CREATE INDEX IF NOT EXISTS idx_streams_parent
    ON streams (user_id, parent_id);

CREATE TABLE IF NOT EXISTS events (
    user_id     TEXT NOT NULL,
    id          TEXT NOT NULL,
    time        TEXT NOT NULL,
    end_time    TEXT,
    type        TEXT NOT NULL,
    content     TEXT,
    stream_ids  TEXT NOT NULL,
    trashed     INTEGER NOT NULL DEFAULT 0,
    deleted     TEXT,
    created     TEXT NOT NULL,
    created_by  TEXT NOT NULL,
    modified    TEXT NOT NULL,
    modified_by TEXT NOT NULL,
    integrity   TEXT,
    attachments TEXT,
    PRIMARY KEY (user_id, id)
);

CREATE INDEX IF NOT EXISTS idx_events_time
    ON events (user_id, time DESC);

CREATE INDEX IF NOT EXISTS idx_events_deleted
    ON events (user_id, deleted)
    WHERE deleted IS NOT NULL;

CREATE TABLE IF NOT EXISTS events_history (
    user_id     TEXT NOT NULL,
    id          TEXT NOT NULL,
    head_id     TEXT NOT NULL,
    archived    TEXT NOT NULL,
    body        TEXT NOT NULL,
    PRIMARY KEY (user_id, id)
);

CREATE INDEX IF NOT EXISTS idx_events_history_head
    ON events_history (user_id, head_id);

CREATE TABLE IF NOT EXISTS attachments (
    user_id   TEXT NOT NULL,
    event_id  TEXT NOT NULL,
    id        TEXT NOT NULL,
    file_name TEXT NOT NULL,
    size      INTEGER NOT NULL,
    mime_type TEXT,
    width     INTEGER,
    height    INTEGER,
    data      BLOB NOT NULL,
    PRIMARY KEY (user_id, event_id, id)
);
";

/// Apply all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
        debug!(from = version, to = 1, "applied sqlite schema migration");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::connection::{ConnectionConfig, new_in_memory};

    #[test]
    fn migrations_are_idempotent() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn sibling_name_uniqueness_is_enforced() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO streams (user_id, id, name, parent_id, created, created_by, modified, modified_by)
             VALUES ('u1', 's1', 'Health', NULL, 't', 'u1', 't', 'u1')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO streams (user_id, id, name, parent_id, created, created_by, modified, modified_by)
             VALUES ('u1', 's2', 'Health', NULL, 't', 'u1', 't', 'u1')",
            [],
        );
        assert!(dup.is_err());
    }
}
