//! Attachment repository — blob payloads for the `attachments` table.
//!
//! Only payload bytes and their descriptive columns live here; the
//! authoritative metadata list is the `attachments` column on the owning
//! event row.

use rusqlite::{Connection, OptionalExtension, params};

use junction_core::event::AttachmentItem;

use crate::contract::{StoreError, StoreResult};

/// Attachment repository — stateless, every method takes `&Connection`.
pub struct AttachmentRepo;

impl AttachmentRepo {
    /// Store a payload for `(event_id, attachment.id)`.
    pub fn insert(
        conn: &Connection,
        user_id: &str,
        event_id: &str,
        attachment: &AttachmentItem,
        data: &[u8],
    ) -> StoreResult<()> {
        let _ = conn.execute(
            "INSERT INTO attachments (user_id, event_id, id, file_name, size, mime_type,
                                      width, height, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                event_id,
                attachment.id,
                attachment.file_name,
                attachment.size as i64,
                attachment.mime_type,
                attachment.width,
                attachment.height,
                data,
            ],
        )?;
        Ok(())
    }

    /// Fetch a payload.
    pub fn get_data(
        conn: &Connection,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<Vec<u8>> {
        conn.query_row(
            "SELECT data FROM attachments WHERE user_id = ?1 AND event_id = ?2 AND id = ?3",
            params![user_id, event_id, attachment_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(attachment_id.to_string()))
    }

    /// Remove one payload. Returns `false` when nothing matched.
    pub fn delete(
        conn: &Connection,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<bool> {
        let removed = conn.execute(
            "DELETE FROM attachments WHERE user_id = ?1 AND event_id = ?2 AND id = ?3",
            params![user_id, event_id, attachment_id],
        )?;
        Ok(removed > 0)
    }

    /// Remove every payload owned by an event.
    pub fn delete_for_event(conn: &Connection, user_id: &str, event_id: &str) -> StoreResult<()> {
        let _ = conn.execute(
            "DELETE FROM attachments WHERE user_id = ?1 AND event_id = ?2",
            params![user_id, event_id],
        )?;
        Ok(())
    }

    /// Remove every payload for a user.
    pub fn delete_all(conn: &Connection, user_id: &str) -> StoreResult<()> {
        let _ = conn.execute(
            "DELETE FROM attachments WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// Byte usage of a user's attachment payloads.
    pub fn storage_size(conn: &Connection, user_id: &str) -> StoreResult<u64> {
        let size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(data)), 0) FROM attachments WHERE user_id = ?1",
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
    use assert_matches::assert_matches;

    use super::*;
    use crate::sqlite::connection::{ConnectionConfig, new_in_memory};
    use crate::sqlite::migrations::run_migrations;

    fn setup() -> crate::sqlite::connection::ConnectionPool {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        pool
    }

    fn item(id: &str) -> AttachmentItem {
        AttachmentItem {
            id: id.into(),
            file_name: "photo.jpg".into(),
            size: 3,
            mime_type: Some("image/jpeg".into()),
            width: Some(640),
            height: Some(480),
        }
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let pool = setup();
        let conn = pool.get().unwrap();
        AttachmentRepo::insert(&conn, "u1", "e1", &item("a1"), &[1, 2, 3]).unwrap();

        assert_eq!(
            AttachmentRepo::get_data(&conn, "u1", "e1", "a1").unwrap(),
            vec![1, 2, 3]
        );
        assert!(AttachmentRepo::delete(&conn, "u1", "e1", "a1").unwrap());
        assert_matches!(
            AttachmentRepo::get_data(&conn, "u1", "e1", "a1"),
            Err(StoreError::NotFound(_))
        );
    }

    #[test]
    fn delete_for_event_sweeps_all_payloads() {
        let pool = setup();
        let conn = pool.get().unwrap();
        AttachmentRepo::insert(&conn, "u1", "e1", &item("a1"), &[1]).unwrap();
        AttachmentRepo::insert(&conn, "u1", "e1", &item("a2"), &[2]).unwrap();
        AttachmentRepo::delete_for_event(&conn, "u1", "e1").unwrap();

        assert_eq!(AttachmentRepo::storage_size(&conn, "u1").unwrap(), 0);
    }

    #[test]
    fn storage_size_sums_payload_bytes() {
        let pool = setup();
        let conn = pool.get().unwrap();
        AttachmentRepo::insert(&conn, "u1", "e1", &item("a1"), &[0; 10]).unwrap();
        AttachmentRepo::insert(&conn, "u1", "e2", &item("a2"), &[0; 5]).unwrap();
        assert_eq!(AttachmentRepo::storage_size(&conn, "u1").unwrap(), 15);
    }
}
