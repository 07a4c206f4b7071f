//! Event routing.
//!
//! Events are dispatched to the store owning their id; all stream references
//! on an event must resolve to that same store, and an update that would
//! move an event across stores is rejected. Reads re-qualify ids and stream
//! references on the way out, and multi-store listings stay lazy: one pull
//! sequence per store, never an eager merge of everything.

use std::sync::Arc;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use junction_core::event::{AttachmentItem, Event, NewEvent};
use junction_core::query::EventsQuery;
use junction_core::{Result, RouterError, StoreId, ids, integrity};
use junction_store::DataStore;

use crate::decompose::decompose_by_store;
use crate::registry::Router;
use crate::translate::map_store_error;

/// Lazy, pull-based sequence of federated events.
pub type RouterEventStream = BoxStream<'static, Result<Event>>;

/// Bulk update specification for [`EventRouter::update_streamed_many`].
///
/// Applied per event, in order: field merges, stream-set union, stream-set
/// difference, field deletions. Deleting the `attachments` field also
/// removes every attachment payload physically. The optional `filter` is
/// evaluated against the mutated candidate; events failing it are neither
/// persisted nor yielded.
#[derive(Clone, Default)]
pub struct EventsUpdate {
    /// Top-level fields merged into the event.
    pub fields_to_set: Map<String, Value>,
    /// Top-level fields removed from the event.
    pub fields_to_delete: Vec<String>,
    /// Stream references unioned into the event's set (store-qualified).
    pub add_streams: Vec<String>,
    /// Stream references removed from the event's set (store-qualified).
    pub remove_streams: Vec<String>,
    /// Keep-predicate over the mutated, federated candidate.
    pub filter: Option<Arc<dyn Fn(&Event) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for EventsUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventsUpdate")
            .field("fields_to_set", &self.fields_to_set)
            .field("fields_to_delete", &self.fields_to_delete)
            .field("add_streams", &self.add_streams)
            .field("remove_streams", &self.remove_streams)
            .field("filter", &self.filter.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Event operations over the registry.
pub struct EventRouter<'a> {
    router: &'a Router,
}

impl<'a> EventRouter<'a> {
    pub(crate) fn new(router: &'a Router) -> Self {
        Self { router }
    }

    /// Fetch one event by qualified id.
    pub async fn get_one(&self, user_id: &str, full_id: &str) -> Result<Option<Event>> {
        let (store_id, local_id) = ids::parse(full_id)?;
        let store = self.router.store(&store_id)?;
        let found = store
            .events()
            .get_one(user_id, &local_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(found.map(|event| qualify_event(&store_id, event)))
    }

    /// Prior revisions of an event, oldest first.
    pub async fn get_history(&self, user_id: &str, full_id: &str) -> Result<Vec<Event>> {
        let (store_id, local_id) = ids::parse(full_id)?;
        let store = self.router.store(&store_id)?;
        let history = store
            .events()
            .get_history(user_id, &local_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(history
            .into_iter()
            .map(|event| qualify_event(&store_id, event))
            .collect())
    }

    /// Eagerly collected federated listing, most recent first.
    #[instrument(skip(self, query))]
    pub async fn get(&self, user_id: &str, query: &EventsQuery) -> Result<Vec<Event>> {
        let parts = decompose_by_store(query)?;
        let mut out = Vec::new();
        for (store_id, sub) in parts {
            let store = self.router.store(&store_id)?;
            let events = store
                .events()
                .get(user_id, &sub)
                .await
                .map_err(|err| map_store_error(&store_id, err))?;
            out.extend(
                events
                    .into_iter()
                    .map(|event| qualify_event(&store_id, event)),
            );
        }
        out.sort_by(|a, b| b.time.cmp(&a.time));
        if let Some(limit) = query.limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    /// Lazy listing; the decomposed query must target a single store.
    /// Multi-store queries go through [`EventRouter::get_streamed_by_store`].
    pub async fn get_streamed(&self, user_id: &str, query: &EventsQuery) -> Result<RouterEventStream> {
        let mut streams = self.get_streamed_by_store(user_id, query).await?;
        if streams.len() > 1 {
            return Err(RouterError::CrossStoreQuery(
                "streamed listing targets more than one store".into(),
            ));
        }
        match streams.pop() {
            Some((_, stream)) => Ok(stream),
            None => Ok(futures::stream::empty().boxed()),
        }
    }

    /// One lazy sequence per store covered by the query. Nothing is fetched
    /// until a sequence is polled, so large result sets are never buffered.
    pub async fn get_streamed_by_store(
        &self,
        user_id: &str,
        query: &EventsQuery,
    ) -> Result<Vec<(StoreId, RouterEventStream)>> {
        let parts = decompose_by_store(query)?;
        let mut out = Vec::with_capacity(parts.len());
        for (store_id, sub) in parts {
            let store = self.router.store(&store_id)?;
            let native = store
                .events()
                .get_streamed(user_id, &sub)
                .await
                .map_err(|err| map_store_error(&store_id, err))?;
            let tag = store_id.clone();
            let mapped = native
                .map(move |item| match item {
                    Ok(event) => Ok(qualify_event(&tag, event)),
                    Err(err) => Err(map_store_error(&tag, err)),
                })
                .boxed();
            out.push((store_id, mapped));
        }
        Ok(out)
    }

    /// Lazy sequence of event tombstones. Defaults to the local store.
    pub async fn get_deletions_streamed(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        store_id: Option<StoreId>,
    ) -> Result<RouterEventStream> {
        let store_id = store_id.unwrap_or_else(StoreId::local);
        let store = self.router.store(&store_id)?;
        let native = store
            .events()
            .get_deletions_streamed(user_id, since)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(native
            .map(move |item| match item {
                Ok(event) => Ok(qualify_event(&store_id, event)),
                Err(err) => Err(map_store_error(&store_id, err)),
            })
            .boxed())
    }

    /// Create an event. The target store is resolved from an explicit id,
    /// or from the first stream reference when the id is absent.
    #[instrument(skip(self, data))]
    pub async fn create(&self, user_id: &str, data: NewEvent) -> Result<Event> {
        if data.attachments.as_ref().is_some_and(|a| !a.is_empty()) {
            return Err(RouterError::InvalidOperation(
                "attachments cannot be supplied at creation time; add them afterwards".into(),
            ));
        }

        let store_id = match (&data.id, data.stream_ids.first()) {
            (Some(full), _) => ids::store_of(full)?,
            (None, Some(first_ref)) => ids::store_of(first_ref)?,
            (None, None) => StoreId::local(),
        };
        let local_id = match &data.id {
            Some(full) => ids::parse(full)?.1,
            None => Uuid::now_v7().to_string(),
        };
        let stream_ids = strip_refs(&store_id, &data.stream_ids)?;

        let now = Utc::now();
        let mut event = Event {
            id: local_id,
            stream_ids,
            event_type: data.event_type,
            content: data.content,
            time: data.time.unwrap_or(now),
            end_time: data.end_time,
            created: now,
            created_by: user_id.to_string(),
            modified: now,
            modified_by: user_id.to_string(),
            trashed: false,
            deleted: None,
            attachments: None,
            integrity: data.integrity,
            head_id: None,
        };
        // Trusted bulk imports carry a pre-computed digest; everything else
        // is signed here.
        if event.integrity.is_none() {
            integrity::sign_event(&mut event);
        }

        let store = self.router.store(&store_id)?;
        let created = store
            .events()
            .create(user_id, event)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(qualify_event(&store_id, created))
    }

    /// Create a batch of events, stopping at the first failure.
    pub async fn create_many(&self, user_id: &str, batch: Vec<NewEvent>) -> Result<Vec<Event>> {
        let mut out = Vec::with_capacity(batch.len());
        for data in batch {
            out.push(self.create(user_id, data).await?);
        }
        Ok(out)
    }

    /// Update an event in place, archiving the previous revision and
    /// recomputing the integrity digest.
    #[instrument(skip(self, data))]
    pub async fn update(&self, user_id: &str, data: Event) -> Result<Event> {
        let (store_id, local_id) = ids::parse(&data.id)?;
        let stream_ids = strip_refs(&store_id, &data.stream_ids)?;

        let mut event = data;
        event.id = local_id;
        event.stream_ids = stream_ids;
        event.modified = Utc::now();
        event.modified_by = user_id.to_string();
        event.integrity = None;
        integrity::sign_event(&mut event);

        let store = self.router.store(&store_id)?;
        let updated = store
            .events()
            .update(user_id, event.clone())
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        if !updated {
            return Err(RouterError::InvalidItemId(event.id));
        }
        Ok(qualify_event(&store_id, event))
    }

    /// Delete an event, leaving a tombstone.
    pub async fn delete(&self, user_id: &str, data: Event) -> Result<Event> {
        let (store_id, local_id) = ids::parse(&data.id)?;
        let mut event = data;
        event.id = local_id;
        event.stream_ids = strip_refs(&store_id, &event.stream_ids)?;

        let store = self.router.store(&store_id)?;
        let tombstone = store
            .events()
            .delete(user_id, event)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(qualify_event(&store_id, tombstone))
    }

    /// Persist an attachment payload and append its metadata to the event.
    pub async fn add_attachment(
        &self,
        user_id: &str,
        full_event_id: &str,
        mut attachment: AttachmentItem,
        data: Vec<u8>,
    ) -> Result<Event> {
        let (store_id, local_id) = ids::parse(full_event_id)?;
        let store = self.router.store(&store_id)?;
        let mut event = store
            .events()
            .get_one(user_id, &local_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))?
            .ok_or_else(|| RouterError::UnknownResource(format!("event '{full_event_id}'")))?;

        if attachment.id.is_empty() {
            attachment.id = Uuid::now_v7().to_string();
        }
        attachment.size = data.len() as u64;
        store
            .events()
            .add_attachment(user_id, &local_id, &attachment, data)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;

        event
            .attachments
            .get_or_insert_with(Vec::new)
            .push(attachment);
        self.resign_and_save(user_id, &store_id, store, event).await
    }

    /// Fetch an attachment payload.
    pub async fn get_attachment(
        &self,
        user_id: &str,
        full_event_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let (store_id, local_id) = ids::parse(full_event_id)?;
        let store = self.router.store(&store_id)?;
        store
            .events()
            .get_attachment(user_id, &local_id, attachment_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))
    }

    /// Remove an attachment payload and its metadata entry.
    pub async fn delete_attachment(
        &self,
        user_id: &str,
        full_event_id: &str,
        attachment_id: &str,
    ) -> Result<Event> {
        let (store_id, local_id) = ids::parse(full_event_id)?;
        let store = self.router.store(&store_id)?;
        let mut event = store
            .events()
            .get_one(user_id, &local_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))?
            .ok_or_else(|| RouterError::UnknownResource(format!("event '{full_event_id}'")))?;

        let list = event.attachments.get_or_insert_with(Vec::new);
        let before = list.len();
        list.retain(|item| item.id != attachment_id);
        if list.len() == before {
            return Err(RouterError::UnknownResource(format!(
                "attachment '{attachment_id}'"
            )));
        }
        if list.is_empty() {
            event.attachments = None;
        }
        store
            .events()
            .delete_attachment(user_id, &local_id, attachment_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        self.resign_and_save(user_id, &store_id, store, event).await
    }

    async fn resign_and_save(
        &self,
        user_id: &str,
        store_id: &StoreId,
        store: &Arc<dyn DataStore>,
        mut event: Event,
    ) -> Result<Event> {
        event.modified = Utc::now();
        event.modified_by = user_id.to_string();
        event.integrity = None;
        integrity::sign_event(&mut event);
        let updated = store
            .events()
            .update(user_id, event.clone())
            .await
            .map_err(|err| map_store_error(store_id, err))?;
        if !updated {
            return Err(RouterError::InvalidItemId(event.id));
        }
        Ok(qualify_event(store_id, event))
    }

    /// Bulk query-transform-write engine, lazy and single-consumer.
    ///
    /// One event at a time: fetch, transform, evaluate
    /// the filter, persist, yield. A consumer that stops polling halts all
    /// further work; events already persisted stay persisted.
    pub fn update_streamed_many(
        &self,
        user_id: &str,
        query: &EventsQuery,
        update: EventsUpdate,
    ) -> Result<RouterEventStream> {
        let parts = decompose_by_store(query)?;
        let mut targets = Vec::with_capacity(parts.len());
        for (store_id, sub) in parts {
            let store = Arc::clone(self.router.store(&store_id)?);
            targets.push((store_id, store, sub));
        }
        let user = user_id.to_string();

        let out = try_stream! {
            for (store_id, store, sub) in targets {
                // Adding a foreign-store ref would move the event, so it
                // errors; removing one is a no-op here and is dropped.
                let add = strip_refs(&store_id, &update.add_streams)?;
                let remove = refs_of_store(&store_id, &update.remove_streams)?;
                let mut native = store
                    .events()
                    .get_streamed(&user, &sub)
                    .await
                    .map_err(|err| map_store_error(&store_id, err))?;
                while let Some(item) = native.next().await {
                    let event = item.map_err(|err| map_store_error(&store_id, err))?;
                    let had_attachments = event.attachments.clone().unwrap_or_default();
                    let mut candidate = transform(event, &update, &add, &remove)?;

                    if let Some(filter) = &update.filter {
                        let federated = qualify_event(&store_id, candidate.clone());
                        if !filter(&federated) {
                            continue;
                        }
                    }

                    if update.fields_to_delete.iter().any(|f| f == "attachments") {
                        for attachment in &had_attachments {
                            store
                                .events()
                                .delete_attachment(&user, &candidate.id, &attachment.id)
                                .await
                                .map_err(|err| map_store_error(&store_id, err))?;
                        }
                    }

                    candidate.modified = Utc::now();
                    candidate.modified_by = user.clone();
                    candidate.integrity = None;
                    integrity::sign_event(&mut candidate);
                    let updated = store
                        .events()
                        .update(&user, candidate.clone())
                        .await
                        .map_err(|err| map_store_error(&store_id, err))?;
                    if !updated {
                        Err(RouterError::InvalidItemId(candidate.id.clone()))?;
                    }
                    yield qualify_event(&store_id, candidate);
                }
            }
        };
        Ok(out.boxed())
    }

    /// Eager convenience over [`EventRouter::update_streamed_many`]:
    /// collects every persisted event.
    pub async fn update_many(
        &self,
        user_id: &str,
        query: &EventsQuery,
        update: EventsUpdate,
    ) -> Result<Vec<Event>> {
        let mut stream = self.update_streamed_many(user_id, query, update)?;
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    /// Callback-driven convenience: invokes `consume` with `Some(event)` per
    /// persisted event, then exactly once with `None` to signal completion.
    pub async fn update_many_with(
        &self,
        user_id: &str,
        query: &EventsQuery,
        update: EventsUpdate,
        mut consume: impl FnMut(Option<Event>) + Send,
    ) -> Result<()> {
        let mut stream = self.update_streamed_many(user_id, query, update)?;
        while let Some(item) = stream.next().await {
            consume(Some(item?));
        }
        consume(None);
        Ok(())
    }
}

/// Apply an update to one store-native event: field merges, stream
/// union, stream difference, field deletions.
fn transform(
    event: Event,
    update: &EventsUpdate,
    add: &[String],
    remove: &[String],
) -> Result<Event> {
    let mut merged = merge_fields(&event, &update.fields_to_set, &[])?;
    for stream_ref in add {
        if !merged.stream_ids.contains(stream_ref) {
            merged.stream_ids.push(stream_ref.clone());
        }
    }
    merged.stream_ids.retain(|id| !remove.contains(id));
    if update.fields_to_delete.is_empty() {
        return Ok(merged);
    }
    merge_fields(&merged, &Map::new(), &update.fields_to_delete)
}

/// JSON-level field surgery over the event's federated shape.
fn merge_fields(event: &Event, set: &Map<String, Value>, delete: &[String]) -> Result<Event> {
    let mut value = serde_json::to_value(event)
        .map_err(|err| RouterError::InvalidRequestStructure(err.to_string()))?;
    let Some(object) = value.as_object_mut() else {
        return Err(RouterError::InvalidRequestStructure(
            "event did not serialize to an object".into(),
        ));
    };
    for (field, field_value) in set {
        let _ = object.insert(field.clone(), field_value.clone());
    }
    for field in delete {
        let _ = object.remove(field);
    }
    serde_json::from_value(value)
        .map_err(|err| RouterError::InvalidRequestStructure(err.to_string()))
}

/// Strip stream references, requiring every one to live in `store_id`.
fn strip_refs(store_id: &StoreId, refs: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(refs.len());
    for full in refs {
        let (ref_store, local) = ids::parse(full)?;
        if ref_store != *store_id {
            return Err(RouterError::InvalidRequestStructure(format!(
                "stream reference '{full}' lives in store '{ref_store}'; \
                 events cannot move stores ('{store_id}')"
            )));
        }
        out.push(local);
    }
    Ok(out)
}

/// The bare stream references belonging to one store; others are dropped.
fn refs_of_store(store_id: &StoreId, refs: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for full in refs {
        let (ref_store, local) = ids::parse(full)?;
        if ref_store == *store_id {
            out.push(local);
        }
    }
    Ok(out)
}

/// Re-tag a store-native event with the store qualifier.
fn qualify_event(store_id: &StoreId, mut event: Event) -> Event {
    event.id = ids::build(store_id, &event.id);
    event.stream_ids = event
        .stream_ids
        .iter()
        .map(|id| ids::build(store_id, id))
        .collect();
    event.head_id = event.head_id.map(|head| ids::build(store_id, &head));
    event
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use assert_matches::assert_matches;

    use junction_core::query::StreamQuery;
    use junction_store::StoreDescriptor;
    use junction_store::memory::MemoryStore;

    use crate::registry::RouterBuilder;

    use super::*;

    async fn router(dir: &std::path::Path) -> Router {
        let mut builder = RouterBuilder::new(dir);
        builder
            .register(
                Arc::new(MemoryStore::new()),
                StoreDescriptor::new(StoreId::local(), "Local"),
            )
            .unwrap();
        builder
            .register(
                Arc::new(MemoryStore::new()),
                StoreDescriptor::new(StoreId::new("vault"), "Vault"),
            )
            .unwrap();
        builder.build().await.unwrap()
    }

    fn new_event(streams: &[&str]) -> NewEvent {
        NewEvent::new("note/txt", streams.iter().map(ToString::to_string).collect())
    }

    #[tokio::test]
    async fn create_signs_and_qualifies() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();

        let created = events
            .create("u1", new_event(&[":vault:s1"]))
            .await
            .unwrap();
        assert!(created.id.starts_with(":vault:"));
        assert_eq!(created.stream_ids, vec![":vault:s1"]);
        assert!(created.integrity.as_deref().unwrap().starts_with("sha256-"));
    }

    #[tokio::test]
    async fn create_with_attachments_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;

        let mut data = new_event(&["s1"]);
        data.attachments = Some(vec![AttachmentItem {
            id: "a1".into(),
            file_name: "f".into(),
            size: 1,
            mime_type: None,
            width: None,
            height: None,
        }]);
        assert_matches!(
            router.events().create("u1", data).await,
            Err(RouterError::InvalidOperation(_))
        );
    }

    #[tokio::test]
    async fn create_rejects_mixed_stream_stores() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        assert_matches!(
            router
                .events()
                .create("u1", new_event(&["s1", ":vault:s2"]))
                .await,
            Err(RouterError::InvalidRequestStructure(_))
        );
    }

    #[tokio::test]
    async fn update_cannot_move_stores() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        let created = events.create("u1", new_event(&["s1"])).await.unwrap();

        let mut moved = created.clone();
        moved.stream_ids = vec![":vault:s9".into()];
        assert_matches!(
            events.update("u1", moved).await,
            Err(RouterError::InvalidRequestStructure(_))
        );
    }

    #[tokio::test]
    async fn update_recomputes_the_digest_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        let created = events.create("u1", new_event(&["s1"])).await.unwrap();
        let old_digest = created.integrity.clone();

        let mut changed = created.clone();
        changed.content = Some(serde_json::json!({"text": "changed"}));
        let updated = events.update("u1", changed).await.unwrap();
        assert_ne!(updated.integrity, old_digest);

        let history = events.get_history("u1", &created.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].head_id.as_deref(), Some(created.id.as_str()));
    }

    #[tokio::test]
    async fn update_of_missing_event_is_invalid_item_id() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let mut ghost = router
            .events()
            .create("u1", new_event(&["s1"]))
            .await
            .unwrap();
        ghost.id = "never-created".into();
        assert_matches!(
            router.events().update("u1", ghost).await,
            Err(RouterError::InvalidItemId(_))
        );
    }

    #[tokio::test]
    async fn attachment_round_trip_updates_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        let created = events.create("u1", new_event(&["s1"])).await.unwrap();

        let item = AttachmentItem {
            id: String::new(),
            file_name: "photo.jpg".into(),
            size: 0,
            mime_type: Some("image/jpeg".into()),
            width: Some(64),
            height: Some(64),
        };
        let with_attachment = events
            .add_attachment("u1", &created.id, item, vec![1, 2, 3])
            .await
            .unwrap();
        let listed = with_attachment.attachments.as_ref().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 3);
        assert_ne!(with_attachment.integrity, created.integrity);

        let payload = events
            .get_attachment("u1", &created.id, &listed[0].id)
            .await
            .unwrap();
        assert_eq!(payload, vec![1, 2, 3]);

        let without = events
            .delete_attachment("u1", &created.id, &listed[0].id)
            .await
            .unwrap();
        assert!(without.attachments.is_none());
    }

    #[tokio::test]
    async fn get_merges_stores_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        events.create("u1", new_event(&["s1"])).await.unwrap();
        events.create("u1", new_event(&[":vault:s9"])).await.unwrap();

        let query = EventsQuery {
            streams: Some(StreamQuery::And(vec![
                StreamQuery::Any(vec!["s1".into()]),
                StreamQuery::Any(vec![":vault:s9".into()]),
            ])),
            ..EventsQuery::default()
        };
        let merged = events.get("u1", &query).await.unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged[0].time >= merged[1].time);
    }

    #[tokio::test]
    async fn streamed_listing_rejects_multi_store_queries() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let query = EventsQuery {
            streams: Some(StreamQuery::And(vec![
                StreamQuery::Any(vec!["s1".into()]),
                StreamQuery::Any(vec![":vault:s9".into()]),
            ])),
            ..EventsQuery::default()
        };
        assert_matches!(
            router.events().get_streamed("u1", &query).await.err(),
            Some(RouterError::CrossStoreQuery(_))
        );
    }

    #[tokio::test]
    async fn bulk_update_applies_filter_after_transform() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        events.create("u1", new_event(&["S1"])).await.unwrap();
        let e2 = events.create("u1", new_event(&["S1", "S2"])).await.unwrap();

        let update = EventsUpdate {
            add_streams: vec!["S3".into()],
            filter: Some(Arc::new(|event: &Event| {
                event.stream_ids.iter().any(|id| id == "S2")
            })),
            ..EventsUpdate::default()
        };
        let query = EventsQuery {
            streams: Some(StreamQuery::Any(vec!["S1".into()])),
            ..EventsQuery::default()
        };
        let changed = events.update_many("u1", &query, update).await.unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, e2.id);
        assert_eq!(changed[0].stream_ids, vec!["S1", "S2", "S3"]);

        // E1 is untouched.
        let all = events.get("u1", &EventsQuery::default()).await.unwrap();
        let e1 = all.iter().find(|e| e.id != e2.id).unwrap();
        assert_eq!(e1.stream_ids, vec!["S1"]);
    }

    #[tokio::test]
    async fn bulk_update_sets_and_deletes_fields() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        let created = events.create("u1", new_event(&["S1"])).await.unwrap();

        let mut fields = Map::new();
        let _ = fields.insert("content".into(), serde_json::json!({"text": "bulk"}));
        let update = EventsUpdate {
            fields_to_set: fields,
            fields_to_delete: vec!["endTime".into()],
            ..EventsUpdate::default()
        };
        let changed = events
            .update_many("u1", &EventsQuery::default(), update)
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(
            changed[0].content,
            Some(serde_json::json!({"text": "bulk"}))
        );
        assert!(changed[0].end_time.is_none());
        assert_eq!(changed[0].id, created.id);
    }

    #[tokio::test]
    async fn callback_bulk_update_signals_completion_once() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        events.create("u1", new_event(&["S1"])).await.unwrap();
        events.create("u1", new_event(&["S1"])).await.unwrap();

        let mut yielded = 0;
        let mut completions = 0;
        events
            .update_many_with(
                "u1",
                &EventsQuery::default(),
                EventsUpdate::default(),
                |item| match item {
                    Some(_) => yielded += 1,
                    None => completions += 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(yielded, 2);
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn delete_yields_a_qualified_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let events = router.events();
        let created = events
            .create("u1", new_event(&[":vault:s1"]))
            .await
            .unwrap();

        let tombstone = events.delete("u1", created.clone()).await.unwrap();
        assert_eq!(tombstone.id, created.id);
        assert!(tombstone.deleted.is_some());

        let mut deletions = events
            .get_deletions_streamed("u1", DateTime::<Utc>::MIN_UTC, Some(StoreId::new("vault")))
            .await
            .unwrap();
        let first = deletions.next().await.unwrap().unwrap();
        assert_eq!(first.id, created.id);
    }
}
