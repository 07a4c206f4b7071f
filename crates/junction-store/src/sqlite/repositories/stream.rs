//! Stream repository — CRUD for the `streams` table.
//!
//! Rows are flat; subtree assembly happens in [`StreamRepo::forest`].
//! Tombstones stay in the table with `deleted` set, which keeps the
//! sibling-name unique index scoped to live rows only.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use junction_core::query::StateFilter;
use junction_core::stream::Stream;

use crate::contract::{StoreError, StoreResult};
use crate::sqlite::repositories::parse_ts;

const STREAM_COLUMNS: &str =
    "id, name, parent_id, trashed, deleted, created, created_by, modified, modified_by";

fn stream_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stream> {
    let deleted: Option<String> = row.get(4)?;
    Ok(Stream {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        children: Vec::new(),
        trashed: row.get(3)?,
        deleted: deleted.as_deref().map(parse_ts).transpose()?,
        created: parse_ts(&row.get::<_, String>(5)?)?,
        created_by: row.get(6)?,
        modified: parse_ts(&row.get::<_, String>(7)?)?,
        modified_by: row.get(8)?,
    })
}

/// Stream repository — stateless, every method takes `&Connection`.
pub struct StreamRepo;

impl StreamRepo {
    /// Insert a live stream row.
    pub fn insert(conn: &Connection, user_id: &str, stream: &Stream) -> StoreResult<()> {
        let inserted = conn.execute(
            "INSERT INTO streams (user_id, id, name, parent_id, trashed, deleted,
                                  created, created_by, modified, modified_by)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                stream.id,
                stream.name,
                stream.parent_id,
                stream.trashed,
                stream.created.to_rfc3339(),
                stream.created_by,
                stream.modified.to_rfc3339(),
                stream.modified_by,
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(code, message))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists(
                    message.unwrap_or_else(|| stream.id.clone()),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Insert a tombstone row directly.
    pub fn insert_deleted(conn: &Connection, user_id: &str, stream: &Stream) -> StoreResult<()> {
        let deleted = stream.deleted.unwrap_or_else(Utc::now);
        let _ = conn.execute(
            "INSERT INTO streams (user_id, id, name, parent_id, trashed, deleted,
                                  created, created_by, modified, modified_by)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                stream.id,
                stream.name,
                stream.parent_id,
                deleted.to_rfc3339(),
                stream.created.to_rfc3339(),
                stream.created_by,
                stream.modified.to_rfc3339(),
                stream.modified_by,
            ],
        )?;
        Ok(())
    }

    /// Fetch one live stream row (no children).
    pub fn get_by_id(
        conn: &Connection,
        user_id: &str,
        stream_id: &str,
    ) -> StoreResult<Option<Stream>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {STREAM_COLUMNS} FROM streams
                     WHERE user_id = ?1 AND id = ?2 AND deleted IS NULL"
                ),
                params![user_id, stream_id],
                stream_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All live stream rows for a user, insertion-ordered.
    pub fn all(conn: &Connection, user_id: &str) -> StoreResult<Vec<Stream>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {STREAM_COLUMNS} FROM streams
             WHERE user_id = ?1 AND deleted IS NULL
             ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map(params![user_id], stream_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Assemble the child forest under `parent_id` from flat rows.
    pub fn forest(
        nodes: &[Stream],
        parent_id: Option<&str>,
        state: StateFilter,
        excluded_ids: &[String],
    ) -> Vec<Stream> {
        nodes
            .iter()
            .filter(|node| {
                node.parent_id.as_deref() == parent_id
                    && state.admits(node.trashed)
                    && !excluded_ids.contains(&node.id)
            })
            .map(|node| {
                let mut out = node.clone();
                out.children = Self::forest(nodes, Some(&node.id), state, excluded_ids);
                out
            })
            .collect()
    }

    /// Overwrite a live stream row. Returns `false` when nothing matched.
    pub fn update(conn: &Connection, user_id: &str, stream: &Stream) -> StoreResult<bool> {
        let changed = conn.execute(
            "UPDATE streams
             SET name = ?3, parent_id = ?4, trashed = ?5, modified = ?6, modified_by = ?7
             WHERE user_id = ?1 AND id = ?2 AND deleted IS NULL",
            params![
                user_id,
                stream.id,
                stream.name,
                stream.parent_id,
                stream.trashed,
                stream.modified.to_rfc3339(),
                stream.modified_by,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Turn one row into a tombstone. Returns `false` when nothing matched.
    pub fn mark_deleted(
        conn: &Connection,
        user_id: &str,
        stream_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let changed = conn.execute(
            "UPDATE streams SET deleted = ?3 WHERE user_id = ?1 AND id = ?2 AND deleted IS NULL",
            params![user_id, stream_id, at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Ids of the live subtree rooted at `stream_id`, root included.
    pub fn subtree_ids(
        conn: &Connection,
        user_id: &str,
        stream_id: &str,
    ) -> StoreResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT id FROM streams WHERE user_id = ?1 AND id = ?2 AND deleted IS NULL
                 UNION ALL
                 SELECT s.id FROM streams s
                 JOIN subtree ON s.parent_id = subtree.id
                 WHERE s.user_id = ?1 AND s.deleted IS NULL
             )
             SELECT id FROM subtree",
        )?;
        let ids = stmt
            .query_map(params![user_id, stream_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Remove every stream row (live and tombstone) for a user.
    pub fn delete_all(conn: &Connection, user_id: &str) -> StoreResult<usize> {
        let removed = conn.execute("DELETE FROM streams WHERE user_id = ?1", params![user_id])?;
        Ok(removed)
    }

    /// Tombstones recorded strictly after `since`.
    pub fn deletions(
        conn: &Connection,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Stream>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {STREAM_COLUMNS} FROM streams
             WHERE user_id = ?1 AND deleted IS NOT NULL AND deleted > ?2
             ORDER BY deleted"
        ))?;
        let rows = stmt
            .query_map(params![user_id, since.to_rfc3339()], stream_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
