//! In-memory backend.
//!
//! Per-user maps behind a `parking_lot::RwLock`. Every operation is atomic
//! at the map level, so the no-op transaction is honest. Used in tests and
//! as a lightweight secondary store in federated setups.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use junction_core::event::{AttachmentItem, Event};
use junction_core::query::{StoreQuery, StreamsQuery};
use junction_core::stream::Stream;

use crate::contract::{
    DataStore, EventPart, EventStream, InitParams, StoreError, StoreResult, StoreTransaction,
    StreamPart,
};

/// Everything one user has in this store.
#[derive(Default)]
struct UserData {
    /// Flat stream nodes; `children` is always empty here and rebuilt on read.
    streams: Vec<Stream>,
    stream_deletions: Vec<Stream>,
    events: Vec<Event>,
    event_deletions: Vec<Event>,
    /// Prior revisions per live event id, oldest first.
    history: HashMap<String, Vec<Event>>,
    /// Attachment payloads keyed by `(event_id, attachment_id)`.
    attachments: HashMap<(String, String), Vec<u8>>,
}

type Shared = Arc<RwLock<HashMap<String, UserData>>>;

/// In-memory [`DataStore`] implementation.
pub struct MemoryStore {
    streams: MemoryStreams,
    events: MemoryEvents,
    init: Arc<OnceLock<InitParams>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let state: Shared = Arc::new(RwLock::new(HashMap::new()));
        let init = Arc::new(OnceLock::new());
        Self {
            streams: MemoryStreams {
                state: Arc::clone(&state),
            },
            events: MemoryEvents {
                state,
                init: Arc::clone(&init),
            },
            init,
        }
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn init(&self, params: InitParams) -> StoreResult<()> {
        if self.init.set(params).is_err() {
            return Err(StoreError::AlreadyInitialized);
        }
        if let Some(params) = self.init.get() {
            let _entered = params.span.enter();
            debug!("memory store initialized");
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
        let _ = self.events.state.write().remove(user_id);
        Ok(())
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(NoopTransaction))
    }
}

/// Transaction handle for a store whose operations are individually atomic.
struct NoopTransaction;

#[async_trait]
impl StoreTransaction for NoopTransaction {
    async fn commit(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streams
// ─────────────────────────────────────────────────────────────────────────────

struct MemoryStreams {
    state: Shared,
}

impl MemoryStreams {
    /// Build the subtree rooted at `parent_id` from the flat node list,
    /// keeping insertion order among siblings.
    fn build_forest(
        nodes: &[Stream],
        parent_id: Option<&str>,
        admit: impl Fn(&Stream) -> bool + Copy,
    ) -> Vec<Stream> {
        nodes
            .iter()
            .filter(|node| node.parent_id.as_deref() == parent_id && admit(node))
            .map(|node| {
                let mut out = node.clone();
                out.children = Self::build_forest(nodes, Some(&node.id), admit);
                out
            })
            .collect()
    }
}

#[async_trait]
impl StreamPart for MemoryStreams {
    async fn get_one(&self, user_id: &str, stream_id: &str) -> StoreResult<Option<Stream>> {
        let state = self.state.read();
        let Some(data) = state.get(user_id) else {
            return Ok(None);
        };
        let Some(node) = data.streams.iter().find(|s| s.id == stream_id) else {
            return Ok(None);
        };
        let mut out = node.clone();
        out.children = Self::build_forest(&data.streams, Some(stream_id), |_| true);
        Ok(Some(out))
    }

    async fn get(&self, user_id: &str, query: &StreamsQuery) -> StoreResult<Vec<Stream>> {
        let state = self.state.read();
        let Some(data) = state.get(user_id) else {
            return Ok(Vec::new());
        };
        let admit = |s: &Stream| query.state.admits(s.trashed);
        match query.id.as_deref() {
            None | Some("*") => Ok(Self::build_forest(&data.streams, None, admit)),
            Some(root_id) => {
                let Some(node) = data.streams.iter().find(|s| s.id == root_id) else {
                    return Ok(Vec::new());
                };
                let mut out = node.clone();
                out.children = Self::build_forest(&data.streams, Some(root_id), admit);
                Ok(vec![out])
            }
        }
    }

    async fn create(&self, user_id: &str, stream: Stream) -> StoreResult<Stream> {
        let mut state = self.state.write();
        let data = state.entry(user_id.to_string()).or_default();
        if data.streams.iter().any(|s| s.id == stream.id) {
            return Err(StoreError::AlreadyExists(stream.id));
        }
        if let Some(parent_id) = &stream.parent_id
            && !data.streams.iter().any(|s| &s.id == parent_id)
        {
            return Err(StoreError::NotFound(parent_id.clone()));
        }
        data.streams.push(stream.clone());
        Ok(stream)
    }

    async fn create_deleted(&self, user_id: &str, stream: Stream) -> StoreResult<Stream> {
        let mut state = self.state.write();
        let data = state.entry(user_id.to_string()).or_default();
        data.stream_deletions.push(stream.clone());
        Ok(stream)
    }

    async fn update(&self, user_id: &str, stream: Stream) -> StoreResult<Stream> {
        let mut state = self.state.write();
        let data = state
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(stream.id.clone()))?;
        let slot = data
            .streams
            .iter_mut()
            .find(|s| s.id == stream.id)
            .ok_or_else(|| StoreError::NotFound(stream.id.clone()))?;
        let mut stored = stream.clone();
        stored.children = Vec::new();
        *slot = stored;
        Ok(stream)
    }

    async fn delete(&self, user_id: &str, stream_id: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        let data = state
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(stream_id.to_string()))?;
        if !data.streams.iter().any(|s| s.id == stream_id) {
            return Err(StoreError::NotFound(stream_id.to_string()));
        }

        // Collect the whole subtree before removing anything.
        let mut doomed = vec![stream_id.to_string()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let parent = doomed[cursor].clone();
            doomed.extend(
                data.streams
                    .iter()
                    .filter(|s| s.parent_id.as_deref() == Some(parent.as_str()))
                    .map(|s| s.id.clone()),
            );
            cursor += 1;
        }

        let now = Utc::now();
        let (removed, kept): (Vec<Stream>, Vec<Stream>) = std::mem::take(&mut data.streams)
            .into_iter()
            .partition(|s| doomed.contains(&s.id));
        data.streams = kept;
        for mut tombstone in removed {
            tombstone.deleted = Some(now);
            tombstone.children = Vec::new();
            data.stream_deletions.push(tombstone);
        }
        Ok(())
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        if let Some(data) = state.get_mut(user_id) {
            data.streams.clear();
            data.stream_deletions.clear();
        }
        Ok(())
    }

    async fn get_deletions(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Stream>> {
        let state = self.state.read();
        let Some(data) = state.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(data
            .stream_deletions
            .iter()
            .filter(|s| s.deleted.is_some_and(|at| at > since))
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

struct MemoryEvents {
    state: Shared,
    init: Arc<OnceLock<InitParams>>,
}

impl MemoryEvents {
    fn sign_if_unsigned(&self, event: &mut Event) {
        if event.integrity.is_none()
            && let Some(params) = self.init.get()
        {
            (params.integrity)(event);
        }
    }

    fn matches(query: &StoreQuery, event: &Event) -> bool {
        if let Some(id) = &query.id
            && &event.id != id
        {
            return false;
        }
        if !query.state.admits(event.trashed) {
            return false;
        }
        if let Some(from) = query.from_time
            && event.end_time.unwrap_or(event.time) < from
        {
            return false;
        }
        if let Some(to) = query.to_time
            && event.time > to
        {
            return false;
        }
        if let Some(types) = &query.types
            && !types.contains(&event.event_type)
        {
            return false;
        }
        if query.running == Some(true) && event.end_time.is_some() {
            return false;
        }
        if let Some(cutoff) = query.modified_since
            && event.modified <= cutoff
        {
            return false;
        }
        if let Some(expr) = &query.streams
            && !expr.matches(&event.stream_ids)
        {
            return false;
        }
        true
    }
}

#[async_trait]
impl EventPart for MemoryEvents {
    async fn get_one(&self, user_id: &str, event_id: &str) -> StoreResult<Option<Event>> {
        let state = self.state.read();
        Ok(state
            .get(user_id)
            .and_then(|data| data.events.iter().find(|e| e.id == event_id))
            .cloned())
    }

    async fn get_history(&self, user_id: &str, event_id: &str) -> StoreResult<Vec<Event>> {
        let state = self.state.read();
        Ok(state
            .get(user_id)
            .and_then(|data| data.history.get(event_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get(&self, user_id: &str, query: &StoreQuery) -> StoreResult<Vec<Event>> {
        let state = self.state.read();
        let Some(data) = state.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<Event> = data
            .events
            .iter()
            .filter(|e| Self::matches(query, e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.time.cmp(&a.time));
        let skip = query.skip.unwrap_or(0) as usize;
        let matched: Vec<Event> = match query.limit {
            Some(limit) => matched.into_iter().skip(skip).take(limit as usize).collect(),
            None => matched.into_iter().skip(skip).collect(),
        };
        Ok(matched)
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
        let tombstones: Vec<Event> = {
            let state = self.state.read();
            state
                .get(user_id)
                .map(|data| {
                    data.event_deletions
                        .iter()
                        .filter(|e| e.deleted.is_some_and(|at| at > since))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(futures::stream::iter(tombstones.into_iter().map(Ok)).boxed())
    }

    async fn create(&self, user_id: &str, mut event: Event) -> StoreResult<Event> {
        self.sign_if_unsigned(&mut event);
        let mut state = self.state.write();
        let data = state.entry(user_id.to_string()).or_default();
        if data.events.iter().any(|e| e.id == event.id) {
            return Err(StoreError::AlreadyExists(event.id));
        }
        data.events.push(event.clone());
        Ok(event)
    }

    async fn update(&self, user_id: &str, mut event: Event) -> StoreResult<bool> {
        self.sign_if_unsigned(&mut event);
        let mut state = self.state.write();
        let Some(data) = state.get_mut(user_id) else {
            return Ok(false);
        };
        let Some(pos) = data.events.iter().position(|e| e.id == event.id) else {
            return Ok(false);
        };
        let mut revision = data.events[pos].clone();
        revision.head_id = Some(revision.id.clone());
        revision.id = format!("rev-{}", Uuid::now_v7());
        data.history.entry(event.id.clone()).or_default().push(revision);
        data.events[pos] = event;
        Ok(true)
    }

    async fn delete(&self, user_id: &str, event: Event) -> StoreResult<Event> {
        let mut state = self.state.write();
        let data = state
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(event.id.clone()))?;
        let before = data.events.len();
        data.events.retain(|e| e.id != event.id);
        if data.events.len() == before {
            return Err(StoreError::NotFound(event.id));
        }
        data.attachments.retain(|(owner, _), _| owner != &event.id);
        let mut tombstone = event;
        tombstone.content = None;
        tombstone.stream_ids = Vec::new();
        tombstone.attachments = None;
        tombstone.integrity = None;
        tombstone.deleted = Some(Utc::now());
        data.event_deletions.push(tombstone.clone());
        Ok(tombstone)
    }

    async fn add_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment: &AttachmentItem,
        data_bytes: Vec<u8>,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        let data = state
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(event_id.to_string()))?;
        if !data.events.iter().any(|e| e.id == event_id) {
            return Err(StoreError::NotFound(event_id.to_string()));
        }
        let _ = data
            .attachments
            .insert((event_id.to_string(), attachment.id.clone()), data_bytes);
        Ok(())
    }

    async fn get_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<Vec<u8>> {
        let state = self.state.read();
        state
            .get(user_id)
            .and_then(|data| {
                data.attachments
                    .get(&(event_id.to_string(), attachment_id.to_string()))
            })
            .cloned()
            .ok_or_else(|| StoreError::NotFound(attachment_id.to_string()))
    }

    async fn delete_attachment(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        let data = state
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(attachment_id.to_string()))?;
        data.attachments
            .remove(&(event_id.to_string(), attachment_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(attachment_id.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
