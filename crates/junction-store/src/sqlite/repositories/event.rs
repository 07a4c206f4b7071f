//! Event repository — CRUD for the `events` and `events_history` tables.
//!
//! Scalar filters (time window, type, state, modified-since) run in SQL;
//! the boolean stream-membership expression and skip/limit run over the
//! decoded rows, since the expression is arbitrary.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use junction_core::event::{AttachmentItem, Event};
use junction_core::query::{StateFilter, StoreQuery};

use crate::contract::{StoreError, StoreResult};
use crate::sqlite::repositories::{parse_json, parse_ts};

const EVENT_COLUMNS: &str = "id, time, end_time, type, content, stream_ids, trashed, deleted,
                             created, created_by, modified, modified_by, integrity, attachments";

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let end_time: Option<String> = row.get(2)?;
    let content: Option<String> = row.get(4)?;
    let deleted: Option<String> = row.get(7)?;
    let attachments: Option<String> = row.get(13)?;
    Ok(Event {
        id: row.get(0)?,
        time: parse_ts(&row.get::<_, String>(1)?)?,
        end_time: end_time.as_deref().map(parse_ts).transpose()?,
        event_type: row.get(3)?,
        content: content.as_deref().map(parse_json).transpose()?,
        stream_ids: parse_json(&row.get::<_, String>(5)?)?,
        trashed: row.get(6)?,
        deleted: deleted.as_deref().map(parse_ts).transpose()?,
        created: parse_ts(&row.get::<_, String>(8)?)?,
        created_by: row.get(9)?,
        modified: parse_ts(&row.get::<_, String>(10)?)?,
        modified_by: row.get(11)?,
        integrity: row.get(12)?,
        attachments: attachments
            .as_deref()
            .map(parse_json::<Vec<AttachmentItem>>)
            .transpose()?,
        head_id: None,
    })
}

fn json_opt<T: serde::Serialize>(value: &Option<T>) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(|inner| serde_json::to_string(inner))
        .transpose()
        .map_err(Into::into)
}

/// Event repository — stateless, every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert a live event row.
    pub fn insert(conn: &Connection, user_id: &str, event: &Event) -> StoreResult<()> {
        let inserted = conn.execute(
            "INSERT INTO events (user_id, id, time, end_time, type, content, stream_ids,
                                 trashed, deleted, created, created_by, modified, modified_by,
                                 integrity, attachments)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                user_id,
                event.id,
                event.time.to_rfc3339(),
                event.end_time.map(|t| t.to_rfc3339()),
                event.event_type,
                json_opt(&event.content)?,
                serde_json::to_string(&event.stream_ids)?,
                event.trashed,
                event.created.to_rfc3339(),
                event.created_by,
                event.modified.to_rfc3339(),
                event.modified_by,
                event.integrity,
                json_opt(&event.attachments)?,
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(code, message))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists(
                    message.unwrap_or_else(|| event.id.clone()),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch one live event.
    pub fn get_by_id(
        conn: &Connection,
        user_id: &str,
        event_id: &str,
    ) -> StoreResult<Option<Event>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE user_id = ?1 AND id = ?2 AND deleted IS NULL"
                ),
                params![user_id, event_id],
                event_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Events matching the query, most recent first.
    pub fn query(conn: &Connection, user_id: &str, query: &StoreQuery) -> StoreResult<Vec<Event>> {
        let mut sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 AND deleted IS NULL"
        );
        let mut args: Vec<SqlValue> = vec![SqlValue::from(user_id.to_string())];

        if let Some(id) = &query.id {
            args.push(SqlValue::from(id.clone()));
            sql.push_str(&format!(" AND id = ?{}", args.len()));
        }
        match query.state {
            StateFilter::Default => sql.push_str(" AND trashed = 0"),
            StateFilter::Trashed => sql.push_str(" AND trashed = 1"),
            StateFilter::All => {}
        }
        if let Some(from) = query.from_time {
            args.push(SqlValue::from(from.to_rfc3339()));
            sql.push_str(&format!(
                " AND COALESCE(end_time, time) >= ?{}",
                args.len()
            ));
        }
        if let Some(to) = query.to_time {
            args.push(SqlValue::from(to.to_rfc3339()));
            sql.push_str(&format!(" AND time <= ?{}", args.len()));
        }
        if query.running == Some(true) {
            sql.push_str(" AND end_time IS NULL");
        }
        if let Some(cutoff) = query.modified_since {
            args.push(SqlValue::from(cutoff.to_rfc3339()));
            sql.push_str(&format!(" AND modified > ?{}", args.len()));
        }
        if let Some(types) = &query.types
            && !types.is_empty()
        {
            let placeholders: Vec<String> = types
                .iter()
                .map(|ty| {
                    args.push(SqlValue::from(ty.clone()));
                    format!("?{}", args.len())
                })
                .collect();
            sql.push_str(&format!(" AND type IN ({})", placeholders.join(", ")));
        }
        sql.push_str(" ORDER BY time DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Stream expression, skip, and limit apply after decoding.
        let filtered = rows.into_iter().filter(|event| {
            query
                .streams
                .as_ref()
                .is_none_or(|expr| expr.matches(&event.stream_ids))
        });
        let skip = query.skip.unwrap_or(0) as usize;
        let out: Vec<Event> = match query.limit {
            Some(limit) => filtered.skip(skip).take(limit as usize).collect(),
            None => filtered.skip(skip).collect(),
        };
        Ok(out)
    }

    /// Overwrite a live event row, archiving the previous revision. Returns
    /// `false` when nothing matched.
    pub fn update(conn: &Connection, user_id: &str, event: &Event) -> StoreResult<bool> {
        let Some(previous) = Self::get_by_id(conn, user_id, &event.id)? else {
            return Ok(false);
        };
        Self::archive_revision(conn, user_id, &previous)?;
        let changed = conn.execute(
            "UPDATE events
             SET time = ?3, end_time = ?4, type = ?5, content = ?6, stream_ids = ?7,
                 trashed = ?8, modified = ?9, modified_by = ?10, integrity = ?11,
                 attachments = ?12
             WHERE user_id = ?1 AND id = ?2 AND deleted IS NULL",
            params![
                user_id,
                event.id,
                event.time.to_rfc3339(),
                event.end_time.map(|t| t.to_rfc3339()),
                event.event_type,
                json_opt(&event.content)?,
                serde_json::to_string(&event.stream_ids)?,
                event.trashed,
                event.modified.to_rfc3339(),
                event.modified_by,
                event.integrity,
                json_opt(&event.attachments)?,
            ],
        )?;
        Ok(changed > 0)
    }

    fn archive_revision(conn: &Connection, user_id: &str, previous: &Event) -> StoreResult<()> {
        let mut revision = previous.clone();
        revision.head_id = Some(revision.id.clone());
        revision.id = format!("rev-{}", Uuid::now_v7());
        let _ = conn.execute(
            "INSERT INTO events_history (user_id, id, head_id, archived, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                revision.id,
                previous.id,
                Utc::now().to_rfc3339(),
                serde_json::to_string(&revision)?,
            ],
        )?;
        Ok(())
    }

    /// Prior revisions of an event, oldest first.
    pub fn history(conn: &Connection, user_id: &str, event_id: &str) -> StoreResult<Vec<Event>> {
        let mut stmt = conn.prepare(
            "SELECT body FROM events_history
             WHERE user_id = ?1 AND head_id = ?2
             ORDER BY archived",
        )?;
        let bodies = stmt
            .query_map(params![user_id, event_id], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(Into::into))
            .collect()
    }

    /// Turn a live event into a tombstone. Returns `false` when nothing
    /// matched.
    pub fn mark_deleted(
        conn: &Connection,
        user_id: &str,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let changed = conn.execute(
            "UPDATE events
             SET deleted = ?3, content = NULL, stream_ids = '[]', attachments = NULL,
                 integrity = NULL
             WHERE user_id = ?1 AND id = ?2 AND deleted IS NULL",
            params![user_id, event_id, at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Tombstones recorded strictly after `since`, oldest first.
    pub fn deletions(
        conn: &Connection,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE user_id = ?1 AND deleted IS NOT NULL AND deleted > ?2
             ORDER BY deleted"
        ))?;
        let rows = stmt
            .query_map(params![user_id, since.to_rfc3339()], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Remove every event row (live, tombstone, and history) for a user.
    pub fn delete_all(conn: &Connection, user_id: &str) -> StoreResult<()> {
        let _ = conn.execute("DELETE FROM events WHERE user_id = ?1", params![user_id])?;
        let _ = conn.execute(
            "DELETE FROM events_history WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// Byte usage for a user's event rows.
    pub fn storage_size(conn: &Connection, user_id: &str) -> StoreResult<u64> {
        let size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(COALESCE(content, '')) + LENGTH(stream_ids)
                             + LENGTH(COALESCE(attachments, ''))), 0)
             FROM events WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(size.max(0) as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use junction_core::query::StreamQuery;

    use super::*;
    use crate::sqlite::connection::{ConnectionConfig, new_in_memory};
    use crate::sqlite::migrations::run_migrations;

    fn setup() -> crate::sqlite::connection::ConnectionPool {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        pool
    }

    fn event(id: &str, streams: &[&str]) -> Event {
        Event {
            id: id.into(),
            stream_ids: streams.iter().map(ToString::to_string).collect(),
            event_type: "note/txt".into(),
            content: Some(serde_json::json!({"text": id})),
            time: Utc::now(),
            end_time: None,
            created: Utc::now(),
            created_by: "u1".into(),
            modified: Utc::now(),
            modified_by: "u1".into(),
            trashed: false,
            deleted: None,
            attachments: None,
            integrity: None,
            head_id: None,
        }
    }

    #[test]
    fn insert_and_query_round_trip() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let source = event("e1", &["s1", "s2"]);
        EventRepo::insert(&conn, "u1", &source).unwrap();

        let found = EventRepo::get_by_id(&conn, "u1", "e1").unwrap().unwrap();
        assert_eq!(found.stream_ids, vec!["s1", "s2"]);
        assert_eq!(found.content, source.content);
    }

    #[test]
    fn query_filters_by_type_and_stream_expression() {
        let pool = setup();
        let conn = pool.get().unwrap();
        EventRepo::insert(&conn, "u1", &event("e1", &["s1"])).unwrap();
        let mut other = event("e2", &["s2"]);
        other.event_type = "mass/kg".into();
        EventRepo::insert(&conn, "u1", &other).unwrap();

        let by_type = EventRepo::query(
            &conn,
            "u1",
            &StoreQuery {
                types: Some(vec!["mass/kg".into()]),
                ..StoreQuery::default()
            },
        )
        .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].id, "e2");

        let by_stream = EventRepo::query(
            &conn,
            "u1",
            &StoreQuery {
                streams: Some(StreamQuery::Any(vec!["s1".into()])),
                ..StoreQuery::default()
            },
        )
        .unwrap();
        assert_eq!(by_stream.len(), 1);
        assert_eq!(by_stream[0].id, "e1");
    }

    #[test]
    fn update_archives_previous_revision() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let source = event("e1", &["s1"]);
        EventRepo::insert(&conn, "u1", &source).unwrap();

        let mut changed = source.clone();
        changed.content = Some(serde_json::json!({"text": "updated"}));
        assert!(EventRepo::update(&conn, "u1", &changed).unwrap());

        let history = EventRepo::history(&conn, "u1", "e1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].head_id.as_deref(), Some("e1"));
        assert_eq!(history[0].content, source.content);
    }

    #[test]
    fn update_missing_returns_false() {
        let pool = setup();
        let conn = pool.get().unwrap();
        assert!(!EventRepo::update(&conn, "u1", &event("ghost", &[])).unwrap());
    }

    #[test]
    fn tombstone_hides_event_and_feeds_deletions() {
        let pool = setup();
        let conn = pool.get().unwrap();
        let before = Utc::now();
        EventRepo::insert(&conn, "u1", &event("e1", &["s1"])).unwrap();
        assert!(EventRepo::mark_deleted(&conn, "u1", "e1", Utc::now()).unwrap());

        assert!(EventRepo::get_by_id(&conn, "u1", "e1").unwrap().is_none());
        let deletions = EventRepo::deletions(&conn, "u1", before).unwrap();
        assert_eq!(deletions.len(), 1);
        assert_eq!(deletions[0].id, "e1");
        assert!(deletions[0].content.is_none());
    }

    #[test]
    fn skip_and_limit_apply_after_filtering() {
        let pool = setup();
        let conn = pool.get().unwrap();
        for idx in 0..5 {
            EventRepo::insert(&conn, "u1", &event(&format!("e{idx}"), &["s1"])).unwrap();
        }
        let page = EventRepo::query(
            &conn,
            "u1",
            &StoreQuery {
                skip: Some(1),
                limit: Some(2),
                ..StoreQuery::default()
            },
        )
        .unwrap();
        assert_eq!(page.len(), 2);
    }
}
