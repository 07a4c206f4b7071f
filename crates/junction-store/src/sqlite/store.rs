//! SQLite [`DataStore`] facade.
//!
//! Writes are serialized through one in-process lock and retried on
//! BUSY/LOCKED with linear backoff + jitter. Reads go straight to the pool.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::debug;

use junction_core::event::{AttachmentItem, Event};
use junction_core::query::{StoreQuery, StreamsQuery};
use junction_core::stream::Stream;

use crate::contract::{
    DataStore, EventPart, EventStream, InitParams, StoreError, StoreResult, StoreTransaction,
    StreamPart,
};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::attachment::AttachmentRepo;
use crate::sqlite::repositories::event::EventRepo;
use crate::sqlite::repositories::stream::StreamRepo;

const BUSY_MAX_RETRIES: u32 = 32;

/// Shared innards of the store and its part views.
struct Inner {
    pool: ConnectionPool,
    write_lock: tokio::sync::Mutex<()>,
    init: OnceLock<InitParams>,
}

impl Inner {
    fn conn(&self) -> StoreResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn sign_if_unsigned(&self, event: &mut Event) {
        if event.integrity.is_none()
            && let Some(params) = self.init.get()
        {
            (params.integrity)(event);
        }
    }

    /// Run a write under the in-process lock, retrying on BUSY/LOCKED with
    /// linear backoff + jitter: base = min(attempts * 10, 500) ms, ±25%.
    async fn with_write<T>(
        &self,
        mut f: impl FnMut(&PooledConnection) -> StoreResult<T> + Send,
    ) -> StoreResult<T>
    where
        T: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut attempts = 0;
        loop {
            let result = self.conn().and_then(|conn| f(&conn));
            match result {
                Ok(value) => return Ok(value),
                Err(err) if is_busy_or_locked(&err) && attempts < BUSY_MAX_RETRIES => {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                    let jitter_range = base_ms / 4;
                    let jitter = if jitter_range > 0 {
                        rand::random::<u64>() % (jitter_range * 2 + 1)
                    } else {
                        0
                    };
                    let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_busy_or_locked(err: &StoreError) -> bool {
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Embedded SQLite store, the usual `local` backend.
pub struct SqliteStore {
    inner: Arc<Inner>,
    streams: SqliteStreams,
    events: SqliteEvents,
}

impl SqliteStore {
    /// Open (or create) a store at the given database file.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let pool = connection::new_file(path, &ConnectionConfig::default())?;
        Self::from_pool(pool)
    }

    /// Open an in-memory store. Test-oriented.
    pub fn open_in_memory() -> StoreResult<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: ConnectionPool) -> StoreResult<Self> {
        let conn = pool.get()?;
        run_migrations(&conn)?;
        drop(conn);
        let inner = Arc::new(Inner {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
            init: OnceLock::new(),
        });
        Ok(Self {
            streams: SqliteStreams {
                inner: Arc::clone(&inner),
            },
            events: SqliteEvents {
                inner: Arc::clone(&inner),
            },
            inner,
        })
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn init(&self, params: InitParams) -> StoreResult<()> {
        if self.inner.init.set(params).is_err() {
            return Err(StoreError::AlreadyInitialized);
        }
        if let Some(params) = self.inner.init.get() {
            let _entered = params.span.enter();
            debug!("sqlite store initialized");
        }
        Ok(())
    }

    fn streams(&self) -> &dyn StreamPart {
        &self.streams
    }

    fn events(&self) -> &dyn EventPart {
        &self.events
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<()> {
        self.inner.with_write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let _ = StreamRepo::delete_all(&tx, user_id)?;
            EventRepo::delete_all(&tx, user_id)?;
            AttachmentRepo::delete_all(&tx, user_id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn user_storage_size(&self, user_id: &str) -> StoreResult<u64> {
        let conn = self.inner.conn()?;
        let events = EventRepo::storage_size(&conn, user_id)?;
        let attachments = AttachmentRepo::storage_size(&conn, user_id)?;
        Ok(events + attachments)
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let conn = self.inner.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn: Mutex::new(Some(conn)),
        }))
    }
}

/// One native SQLite transaction on a dedicated pooled connection.
struct SqliteTransaction {
    conn: Mutex<Option<PooledConnection>>,
}

impl SqliteTransaction {
    fn finish(&self, sql: &str) -> StoreResult<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Err(StoreError::Internal("transaction already finished".into()));
        };
        conn.execute_batch(sql)?;
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn commit(&self) -> StoreResult<()> {
        self.finish("COMMIT")
    }

    async fn rollback(&self) -> StoreResult<()> {
        self.finish("ROLLBACK")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streams
// ─────────────────────────────────────────────────────────────────────────────

struct SqliteStreams {
    inner: Arc<Inner>,
}

#[async_trait]
impl StreamPart for SqliteStreams {
    async fn get_one(&self, user_id: &str, stream_id: &str) -> StoreResult<Option<Stream>> {
        let conn = self.inner.conn()?;
        let Some(node) = StreamRepo::get_by_id(&conn, user_id, stream_id)? else {
            return Ok(None);
        };
        let all = StreamRepo::all(&conn, user_id)?;
        let mut out = node;
        out.children = StreamRepo::forest(
            &all,
            Some(stream_id),
            junction_core::query::StateFilter::All,
            &[],
        );
        Ok(Some(out))
    }

    async fn get(&self, user_id: &str, query: &StreamsQuery) -> StoreResult<Vec<Stream>> {
        let conn = self.inner.conn()?;
        let all = StreamRepo::all(&conn, user_id)?;
        match query.id.as_deref() {
            None | Some("*") => Ok(StreamRepo::forest(
                &all,
                None,
                query.state,
                &query.excluded_ids,
            )),
            Some(root_id) => {
                let Some(node) = all.iter().find(|s| s.id == root_id) else {
                    return Ok(Vec::new());
                };
                if query.excluded_ids.contains(&node.id) {
                    return Ok(Vec::new());
                }
                let mut out = node.clone();
                out.children =
                    StreamRepo::forest(&all, Some(root_id), query.state, &query.excluded_ids);
                Ok(vec![out])
            }
        }
    }

    async fn create(&self, user_id: &str, stream: Stream) -> StoreResult<Stream> {
        self.inner.with_write(|conn| {
            StreamRepo::insert(conn, user_id, &stream)?;
            Ok(stream.clone())
        })
        .await
    }

    async fn create_deleted(&self, user_id: &str, stream: Stream) -> StoreResult<Stream> {
        self.inner.with_write(|conn| {
            StreamRepo::insert_deleted(conn, user_id, &stream)?;
            Ok(stream.clone())
        })
        .await
    }

    async fn update(&self, user_id: &str, stream: Stream) -> StoreResult<Stream> {
        self.inner.with_write(|conn| {
            if !StreamRepo::update(conn, user_id, &stream)? {
                return Err(StoreError::NotFound(stream.id.clone()));
            }
            Ok(stream.clone())
        })
        .await
    }

    async fn delete(&self, user_id: &str, stream_id: &str) -> StoreResult<()> {
        self.inner.with_write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let doomed = StreamRepo::subtree_ids(&tx, user_id, stream_id)?;
            if doomed.is_empty() {
                return Err(StoreError::NotFound(stream_id.to_string()));
            }
            let now = Utc::now();
            for id in &doomed {
                let _ = StreamRepo::mark_deleted(&tx, user_id, id, now)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        self.inner.with_write(|conn| {
            let _ = StreamRepo::delete_all(conn, user_id)?;
            Ok(())
        })
        .await
    }

    async fn get_deletions(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Stream>> {
        let conn = self.inner.conn()?;
        StreamRepo::deletions(&conn, user_id, since)
    }

    fn supports_id_exclusion(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

struct SqliteEvents {
    inner: Arc<Inner>,
}

#[async_trait]
impl EventPart for SqliteEvents {
    async fn get_one(&self, user_id: &str, event_id: &str) -> StoreResult<Option<Event>> {
        let conn = self.inner.conn()?;
        EventRepo::get_by_id(&conn, user_id, event_id)
    }

    async fn get_history(&self, user_id: &str, event_id: &str) -> StoreResult<Vec<Event>> {
        let conn = self.inner.conn()?;
        EventRepo::history(&conn, user_id, event_id)
    }

    async fn get(&self, user_id: &str, query: &StoreQuery) -> StoreResult<Vec<Event>> {
        let conn = self.inner.conn()?;
        EventRepo::query(&conn, user_id, query)
    }

    async fn get_streamed(&self, user_id: &str, query: &StoreQuery) -> StoreResult<EventStream> {
        let events = self.get(user_id, query).await?;
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn get_deletions_streamed(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<EventStream> {
        let conn = self.inner.conn()?;
        let tombstones = EventRepo::deletions(&conn, user_id, since)?;
        Ok(futures::stream::iter(tombstones.into_iter().map(Ok)).boxed())
    }

    async fn create(&self, user_id: &str, mut event: Event) -> StoreResult<Event> {
        self.inner.sign_if_unsigned(&mut event);
        self.inner.with_write(|conn| {
            EventRepo::insert(conn, user_id, &event)?;
            Ok(event.clone())
        })
        .await
    }

    async fn update(&self, user_id: &str, mut event: Event) -> StoreResult<bool> {
        self.inner.sign_if_unsigned(&mut event);
        self.inner.with_write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let updated = EventRepo::update(&tx, user_id, &event)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, user_id: &str, event: Event) -> StoreResult<Event> {
        self.inner.with_write(|conn| {
            let now = Utc::now();
            let tx = conn.unchecked_transaction()?;
            if !EventRepo::mark_deleted(&tx, user_id, &event.id, now)? {
                return Err(StoreError::NotFound(event.id.clone()));
            }
            AttachmentRepo::delete_for_event(&tx, user_id, &event.id)?;
            tx.commit()?;

            let mut tombstone = event.clone();
            tombstone.deleted = Some(now);
            tombstone.content = None;
            tombstone.stream_ids = Vec::new();
            tombstone.attachments = None;
            tombstone.integrity = None;
            Ok(tombstone)
        })
        .await
    }

    async fn add_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment: &AttachmentItem,
        data: Vec<u8>,
    ) -> StoreResult<()> {
        self.inner.with_write(|conn| {
            if EventRepo::get_by_id(conn, user_id, event_id)?.is_none() {
                return Err(StoreError::NotFound(event_id.to_string()));
            }
            AttachmentRepo::insert(conn, user_id, event_id, attachment, &data)
        })
        .await
    }

    async fn get_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<Vec<u8>> {
        let conn = self.inner.conn()?;
        AttachmentRepo::get_data(&conn, user_id, event_id, attachment_id)
    }

    async fn delete_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<()> {
        self.inner.with_write(|conn| {
            if !AttachmentRepo::delete(conn, user_id, event_id, attachment_id)? {
                return Err(StoreError::NotFound(attachment_id.to_string()));
            }
            Ok(())
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use assert_matches::assert_matches;
    use futures::TryStreamExt;

    use super::*;
    use crate::kv::KvHandle;

    fn stream(id: &str, name: &str, parent: Option<&str>) -> Stream {
        Stream {
            id: id.into(),
            name: name.into(),
            parent_id: parent.map(Into::into),
            children: Vec::new(),
            trashed: false,
            deleted: None,
            created: Utc::now(),
            created_by: "u1".into(),
            modified: Utc::now(),
            modified_by: "u1".into(),
        }
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

    #[tokio::test]
    async fn init_applies_integrity_on_create() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        store
            .init(InitParams {
                kv: KvHandle::open(dir.path().join("kv.json")).unwrap(),
                span: tracing::Span::none(),
                integrity: Arc::new(junction_core::integrity::sign_event),
            })
            .await
            .unwrap();

        let created = store.events().create("u1", event("e1", &["s1"])).await.unwrap();
        assert!(created.integrity.as_deref().unwrap().starts_with("sha256-"));
    }

    #[tokio::test]
    async fn double_init_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let params = InitParams {
            kv: KvHandle::open(dir.path().join("kv.json")).unwrap(),
            span: tracing::Span::none(),
            integrity: Arc::new(|_| {}),
        };
        store.init(params.clone()).await.unwrap();
        assert_matches!(store.init(params).await, Err(StoreError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn stream_tree_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let streams = store.streams();
        streams.create("u1", stream("a", "A", None)).await.unwrap();
        streams.create("u1", stream("b", "B", Some("a"))).await.unwrap();

        let found = streams.get_one("u1", "a").await.unwrap().unwrap();
        assert_eq!(found.children.len(), 1);
        assert_eq!(found.children[0].id, "b");
    }

    #[tokio::test]
    async fn delete_stream_tombstones_subtree() {
        let store = SqliteStore::open_in_memory().unwrap();
        let streams = store.streams();
        let before = Utc::now();
        streams.create("u1", stream("a", "A", None)).await.unwrap();
        streams.create("u1", stream("b", "B", Some("a"))).await.unwrap();
        streams.delete("u1", "a").await.unwrap();

        let deletions = streams.get_deletions("u1", before).await.unwrap();
        assert_eq!(deletions.len(), 2);
    }

    #[tokio::test]
    async fn event_delete_leaves_tombstone_and_sweeps_attachments() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = store.events();
        let created = events.create("u1", event("e1", &["s1"])).await.unwrap();

        let item = AttachmentItem {
            id: "a1".into(),
            file_name: "f".into(),
            size: 1,
            mime_type: None,
            width: None,
            height: None,
        };
        events.add_attachment("u1", "e1", &item, vec![9]).await.unwrap();

        let tombstone = events.delete("u1", created).await.unwrap();
        assert!(tombstone.deleted.is_some());
        assert_matches!(
            events.get_attachment("u1", "e1", "a1").await,
            Err(StoreError::NotFound(_))
        );

        let deletions: Vec<Event> = events
            .get_deletions_streamed("u1", DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(deletions.len(), 1);
    }

    #[tokio::test]
    async fn storage_size_counts_events_and_attachments() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.events().create("u1", event("e1", &["s1"])).await.unwrap();
        let item = AttachmentItem {
            id: "a1".into(),
            file_name: "f".into(),
            size: 4,
            mime_type: None,
            width: None,
            height: None,
        };
        store
            .events()
            .add_attachment("u1", "e1", &item, vec![0; 4])
            .await
            .unwrap();

        let size = store.user_storage_size("u1").await.unwrap();
        assert!(size >= 4);
    }

    #[tokio::test]
    async fn delete_user_sweeps_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.streams().create("u1", stream("a", "A", None)).await.unwrap();
        store.events().create("u1", event("e1", &["a"])).await.unwrap();
        store.delete_user("u1").await.unwrap();

        assert!(store.streams().get("u1", &StreamsQuery::default()).await.unwrap().is_empty());
        assert_eq!(store.user_storage_size("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transaction_commit_and_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).unwrap();
        let tx = store.begin_transaction().await.unwrap();
        tx.commit().await.unwrap();
        assert_matches!(tx.commit().await, Err(StoreError::Internal(_)));

        let tx = store.begin_transaction().await.unwrap();
        tx.rollback().await.unwrap();
    }
}
