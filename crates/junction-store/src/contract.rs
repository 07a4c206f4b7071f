//! The per-backend store contract.
//!
//! Every registered backend implements [`DataStore`] and exposes its stream
//! and event surfaces through [`StreamPart`] / [`EventPart`]. The registry
//! calls [`DataStore::init`] exactly once, handing the store its key/value
//! persistence handle, a tracing span scoped to the store, and the integrity
//! callback used to sign events on write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use junction_core::StoreId;
use junction_core::event::{AttachmentItem, Event};
use junction_core::query::{StoreQuery, StreamsQuery};
use junction_core::stream::Stream;

use crate::kv::KvHandle;

/// Backend-native error vocabulary.
///
/// These never cross the router boundary — the router translates them into
/// `RouterError` first.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No item with the given id.
    #[error("item not found: {0}")]
    NotFound(String),

    /// An item with the given id (or unique key) already exists.
    #[error("item already exists: {0}")]
    AlreadyExists(String),

    /// The store rejected the shape of a request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `init` was called a second time on the same store instance.
    #[error("store already initialized")]
    AlreadyInitialized,

    /// SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool failure.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

/// Convenience alias for store-facing results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lazy event sequence produced by a store.
pub type EventStream = BoxStream<'static, StoreResult<Event>>;

/// Callback that computes and assigns the integrity digest on a
/// store-native event.
pub type IntegrityFn = std::sync::Arc<dyn Fn(&mut Event) + Send + Sync>;

/// Descriptive metadata for a registered store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDescriptor {
    /// Unique store id; `local` is reserved for the default store.
    pub id: StoreId,
    /// Human-readable name, used for the synthetic federated root node.
    pub name: String,
    /// Per-store settings blob, opaque to the router.
    #[serde(default)]
    pub settings: Value,
}

impl StoreDescriptor {
    /// Descriptor with empty settings.
    #[must_use]
    pub fn new(id: StoreId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            settings: Value::Null,
        }
    }
}

/// Parameters handed to a store at one-time initialization.
#[derive(Clone)]
pub struct InitParams {
    /// Per-store key/value persistence handle.
    pub kv: KvHandle,
    /// Tracing span scoped to this store.
    pub span: tracing::Span,
    /// Integrity callback applied to events the store persists.
    pub integrity: IntegrityFn,
}

/// A backend-native transaction.
///
/// One is created per store touched within a transaction scope; there is no
/// cross-store coordination.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Commit this store's writes.
    async fn commit(&self) -> StoreResult<()>;
    /// Roll back this store's writes.
    async fn rollback(&self) -> StoreResult<()>;
}

/// Stream surface of a store. All ids are bare local ids.
#[async_trait]
pub trait StreamPart: Send + Sync {
    /// Fetch one stream with its subtree, or `None`.
    async fn get_one(&self, user_id: &str, stream_id: &str) -> StoreResult<Option<Stream>>;

    /// List streams; `id = "*"` (or absent) returns the whole forest.
    async fn get(&self, user_id: &str, query: &StreamsQuery) -> StoreResult<Vec<Stream>>;

    /// Persist a new stream.
    async fn create(&self, user_id: &str, stream: Stream) -> StoreResult<Stream>;

    /// Persist a tombstone record directly.
    async fn create_deleted(&self, user_id: &str, stream: Stream) -> StoreResult<Stream>;

    /// Update an existing stream. Fails with [`StoreError::NotFound`] when
    /// the id matches nothing.
    async fn update(&self, user_id: &str, stream: Stream) -> StoreResult<Stream>;

    /// Delete one stream (and its subtree), leaving a tombstone.
    async fn delete(&self, user_id: &str, stream_id: &str) -> StoreResult<()>;

    /// Remove every stream of a user. Bulk/test-oriented.
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;

    /// Tombstones recorded strictly after `since`.
    async fn get_deletions(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Stream>>;

    /// Whether [`StreamPart::get`] honors `excluded_ids` server-side. When
    /// `false`, the router filters the returned tree itself.
    fn supports_id_exclusion(&self) -> bool {
        false
    }
}

/// Event surface of a store. All ids and stream references are bare local ids.
#[async_trait]
pub trait EventPart: Send + Sync {
    /// Fetch one event, or `None`.
    async fn get_one(&self, user_id: &str, event_id: &str) -> StoreResult<Option<Event>>;

    /// Prior revisions of an event, oldest first.
    async fn get_history(&self, user_id: &str, event_id: &str) -> StoreResult<Vec<Event>>;

    /// List events matching the query, most recent first.
    async fn get(&self, user_id: &str, query: &StoreQuery) -> StoreResult<Vec<Event>>;

    /// Lazy variant of [`EventPart::get`].
    async fn get_streamed(&self, user_id: &str, query: &StoreQuery) -> StoreResult<EventStream>;

    /// Lazy sequence of event tombstones recorded strictly after `since`.
    async fn get_deletions_streamed(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<EventStream>;

    /// Persist a new event.
    async fn create(&self, user_id: &str, event: Event) -> StoreResult<Event>;

    /// Update an existing event, archiving the previous revision. Returns
    /// `false` when the id matches nothing.
    async fn update(&self, user_id: &str, event: Event) -> StoreResult<bool>;

    /// Delete an event, leaving a tombstone. Returns the tombstone.
    async fn delete(&self, user_id: &str, event: Event) -> StoreResult<Event>;

    /// Persist an attachment payload for an event. Metadata bookkeeping on
    /// the event itself is the router's job.
    async fn add_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment: &AttachmentItem,
        data: Vec<u8>,
    ) -> StoreResult<()>;

    /// Fetch an attachment payload.
    async fn get_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<Vec<u8>>;

    /// Remove an attachment payload.
    async fn delete_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<()>;
}

/// A pluggable backend store.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// One-time initialization. Fails with [`StoreError::AlreadyInitialized`]
    /// on a second call.
    async fn init(&self, params: InitParams) -> StoreResult<()>;

    /// Stream surface.
    fn streams(&self) -> &dyn StreamPart;

    /// Event surface.
    fn events(&self) -> &dyn EventPart;

    /// Remove every record belonging to a user.
    async fn delete_user(&self, user_id: &str) -> StoreResult<()>;

    /// Reported byte usage for a user. Stores without usage accounting
    /// report 0.
    async fn user_storage_size(&self, _user_id: &str) -> StoreResult<u64> {
        Ok(0)
    }

    /// Begin a backend-native transaction.
    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}
