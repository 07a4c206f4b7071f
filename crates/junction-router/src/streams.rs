//! Stream routing.
//!
//! Streams live in exactly one store; the router resolves the owning store
//! from the (possibly qualified) id or parent id, dispatches, and re-tags
//! foreign results with the store qualifier on the way out. The federated
//! root listing surfaces every non-local store as a synthetic, childless
//! pseudo-root node so foreign stores stay browsable.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use junction_core::query::{StateFilter, StreamsQuery};
use junction_core::stream::{NewStream, Stream};
use junction_core::{Result, RouterError, StoreId, ids};

use crate::registry::Router;
use crate::translate::map_store_error;

/// Id of the synthetic root node representing a whole store.
const ROOT: &str = "*";

/// Stream operations over the registry.
pub struct StreamRouter<'a> {
    router: &'a Router,
}

impl<'a> StreamRouter<'a> {
    pub(crate) fn new(router: &'a Router) -> Self {
        Self { router }
    }

    /// Fetch one stream (with its subtree) by qualified id.
    pub async fn get_one(&self, user_id: &str, full_id: &str) -> Result<Option<Stream>> {
        let (store_id, local_id) = ids::parse(full_id)?;
        if local_id == ROOT {
            // Only foreign stores have an addressable synthetic root.
            if store_id.is_local() {
                return Ok(None);
            }
            let mut roots = self
                .list_store(user_id, &store_id, &StreamsQuery::default(), true)
                .await?;
            return Ok(roots.pop());
        }
        let store = self.router.store(&store_id)?;
        let found = store
            .streams()
            .get_one(user_id, &local_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(found.map(|stream| qualify_tree(&store_id, stream)))
    }

    /// List streams. A `*` (or absent) id at the local store returns the
    /// local forest plus one pseudo-root per other registered store; at a
    /// foreign store it returns that store's forest wrapped under a single
    /// synthetic root node named after the store.
    pub async fn get(&self, user_id: &str, query: &StreamsQuery) -> Result<Vec<Stream>> {
        let (store_id, local_id) = match query.id.as_deref() {
            None => (
                query.store_id.clone().unwrap_or_else(StoreId::local),
                ROOT.to_string(),
            ),
            Some(raw) => {
                let (parsed_store, local) = ids::parse(raw)?;
                // An unqualified id defers to the explicit store selector.
                let store = if parsed_store.is_local() {
                    query.store_id.clone().unwrap_or(parsed_store)
                } else {
                    parsed_store
                };
                (store, local)
            }
        };

        if local_id == ROOT {
            if store_id.is_local() {
                let mut out = self.list_store(user_id, &store_id, query, false).await?;
                for other in self.router.store_ids() {
                    if !other.is_local() {
                        out.push(self.pseudo_root(other)?);
                    }
                }
                return Ok(out);
            }
            return self.list_store(user_id, &store_id, query, true).await;
        }

        // Subtree listing under one concrete stream.
        let store = self.router.store(&store_id)?;
        let sub = store_scoped_query(&store_id, Some(local_id), query)?;
        let found = store
            .streams()
            .get(user_id, &sub)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        let excluded = excluded_for(&store_id, &query.excluded_ids)?;
        let filtered = if store.streams().supports_id_exclusion() {
            found
        } else {
            prune_excluded(found, &excluded)
        };
        Ok(filtered
            .into_iter()
            .map(|stream| qualify_tree(&store_id, stream))
            .collect())
    }

    /// Create a stream, or a tombstone when `deleted` is set.
    pub async fn create(&self, user_id: &str, data: NewStream) -> Result<Stream> {
        if data.deleted.is_some() {
            return self.create_tombstone(user_id, data).await;
        }

        // The parent decides the store; an explicit id must agree. Without a
        // parent the explicit id decides, and without either it is local. A
        // `*` parent means the root of that store.
        let (parent_store, parent_local) = match data.parent_id.as_deref() {
            Some(parent_full) => {
                let (store, local) = ids::parse(parent_full)?;
                if local == ROOT {
                    (store, None)
                } else {
                    (store, Some(local))
                }
            }
            None => match data.id.as_deref() {
                Some(full) => (ids::store_of(full)?, None),
                None => (StoreId::local(), None),
            },
        };
        let local_id = match data.id.as_deref() {
            Some(full) => {
                let (id_store, local) = ids::parse(full)?;
                if id_store != parent_store {
                    return Err(RouterError::InvalidRequestStructure(format!(
                        "stream id targets store '{id_store}' but its parent lives in '{parent_store}'"
                    )));
                }
                local
            }
            None => Uuid::now_v7().to_string(),
        };

        let store = self.router.store(&parent_store)?;
        let existing = store
            .streams()
            .get_one(user_id, &local_id)
            .await
            .map_err(|err| map_store_error(&parent_store, err))?;
        if existing.is_some() {
            return Err(RouterError::ItemAlreadyExists(format!(
                "stream '{local_id}'"
            )));
        }
        self.check_sibling_name(user_id, &parent_store, parent_local.as_deref(), &data.name, None)
            .await?;

        let now = Utc::now();
        let stream = Stream {
            id: local_id,
            name: data.name,
            parent_id: parent_local,
            children: Vec::new(),
            trashed: false,
            deleted: None,
            created: now,
            created_by: user_id.to_string(),
            modified: now,
            modified_by: user_id.to_string(),
        };
        let created = store
            .streams()
            .create(user_id, stream)
            .await
            .map_err(|err| map_store_error(&parent_store, err))?;
        Ok(qualify_tree(&parent_store, created))
    }

    async fn create_tombstone(&self, user_id: &str, data: NewStream) -> Result<Stream> {
        let full_id = data.id.ok_or_else(|| {
            RouterError::InvalidRequestStructure("tombstone creation requires an id".into())
        })?;
        let (store_id, local_id) = ids::parse(&full_id)?;
        let now = Utc::now();
        let stream = Stream {
            id: local_id,
            name: data.name,
            parent_id: strip_parent(&store_id, data.parent_id.as_deref())?,
            children: Vec::new(),
            trashed: true,
            deleted: data.deleted,
            created: now,
            created_by: user_id.to_string(),
            modified: now,
            modified_by: user_id.to_string(),
        };
        let store = self.router.store(&store_id)?;
        let created = store
            .streams()
            .create_deleted(user_id, stream)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(qualify_tree(&store_id, created))
    }

    /// Update a stream in place. A parent move must stay within the store.
    pub async fn update(&self, user_id: &str, data: Stream) -> Result<Stream> {
        let (store_id, local_id) = ids::parse(&data.id)?;
        let parent_local = strip_parent(&store_id, data.parent_id.as_deref())?;
        self.check_sibling_name(
            user_id,
            &store_id,
            parent_local.as_deref(),
            &data.name,
            Some(&local_id),
        )
        .await?;

        let mut stream = data;
        stream.id = local_id;
        stream.parent_id = parent_local;
        stream.children = Vec::new();
        stream.modified = Utc::now();
        stream.modified_by = user_id.to_string();

        let store = self.router.store(&store_id)?;
        let updated = store
            .streams()
            .update(user_id, stream)
            .await
            .map_err(|err| map_store_error(&store_id, err))?;
        Ok(qualify_tree(&store_id, updated))
    }

    /// Delete a stream and its subtree, leaving tombstones.
    pub async fn delete(&self, user_id: &str, full_id: &str) -> Result<()> {
        let (store_id, local_id) = ids::parse(full_id)?;
        let store = self.router.store(&store_id)?;
        store
            .streams()
            .delete(user_id, &local_id)
            .await
            .map_err(|err| map_store_error(&store_id, err))
    }

    /// Remove every stream of a user in one store. Bulk/test-oriented.
    pub async fn delete_all(&self, user_id: &str, store_id: &StoreId) -> Result<()> {
        let store = self.router.store(store_id)?;
        store
            .streams()
            .delete_all(user_id)
            .await
            .map_err(|err| map_store_error(store_id, err))
    }

    /// Merged tombstones from the named stores; defaults to local only.
    pub async fn get_deletions(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        store_ids: &[StoreId],
    ) -> Result<Vec<Stream>> {
        let local = [StoreId::local()];
        let targets: &[StoreId] = if store_ids.is_empty() {
            &local
        } else {
            store_ids
        };
        let mut out = Vec::new();
        for store_id in targets {
            let store = self.router.store(store_id)?;
            let deletions = store
                .streams()
                .get_deletions(user_id, since)
                .await
                .map_err(|err| map_store_error(store_id, err))?;
            out.extend(
                deletions
                    .into_iter()
                    .map(|stream| qualify_tree(store_id, stream)),
            );
        }
        Ok(out)
    }

    /// One store's forest, qualified, optionally wrapped under a synthetic
    /// root node named after the store.
    async fn list_store(
        &self,
        user_id: &str,
        store_id: &StoreId,
        query: &StreamsQuery,
        wrap: bool,
    ) -> Result<Vec<Stream>> {
        let store = self.router.store(store_id)?;
        let sub = store_scoped_query(store_id, None, query)?;
        let found = store
            .streams()
            .get(user_id, &sub)
            .await
            .map_err(|err| map_store_error(store_id, err))?;
        let excluded = excluded_for(store_id, &query.excluded_ids)?;
        let filtered = if store.streams().supports_id_exclusion() {
            found
        } else {
            prune_excluded(found, &excluded)
        };
        let qualified: Vec<Stream> = filtered
            .into_iter()
            .map(|stream| qualify_tree(store_id, stream))
            .collect();
        if !wrap {
            return Ok(qualified);
        }
        let mut root = self.pseudo_root(store_id)?;
        root.children = qualified;
        Ok(vec![root])
    }

    /// Childless synthetic node standing in for a whole foreign store.
    fn pseudo_root(&self, store_id: &StoreId) -> Result<Stream> {
        let descriptor = self.router.descriptor(store_id)?;
        let now = Utc::now();
        Ok(Stream {
            id: ids::build(store_id, ROOT),
            name: descriptor.name.clone(),
            parent_id: None,
            children: Vec::new(),
            trashed: false,
            deleted: None,
            created: now,
            created_by: "system".to_string(),
            modified: now,
            modified_by: "system".to_string(),
        })
    }

    /// Best-effort sibling-name uniqueness. The check and the subsequent
    /// insert are not atomic; backends with a native uniqueness constraint
    /// close the remaining race themselves.
    async fn check_sibling_name(
        &self,
        user_id: &str,
        store_id: &StoreId,
        parent_local: Option<&str>,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Result<()> {
        let store = self.router.store(store_id)?;
        let siblings = match parent_local {
            Some(parent) => {
                let parent_node = store
                    .streams()
                    .get_one(user_id, parent)
                    .await
                    .map_err(|err| map_store_error(store_id, err))?
                    .ok_or_else(|| {
                        RouterError::UnknownResource(format!("parent stream '{parent}'"))
                    })?;
                parent_node.children
            }
            None => {
                let sub = StreamsQuery {
                    state: StateFilter::All,
                    ..StreamsQuery::default()
                };
                store
                    .streams()
                    .get(user_id, &sub)
                    .await
                    .map_err(|err| map_store_error(store_id, err))?
            }
        };
        let clash = siblings
            .iter()
            .any(|sibling| sibling.name == name && exclude_id != Some(sibling.id.as_str()));
        if clash {
            return Err(RouterError::ItemAlreadyExists(format!(
                "stream named '{name}' under the same parent"
            )));
        }
        Ok(())
    }
}

/// Strip and validate a parent reference against the owning store.
fn strip_parent(store_id: &StoreId, parent_full: Option<&str>) -> Result<Option<String>> {
    let Some(parent_full) = parent_full else {
        return Ok(None);
    };
    let (parent_store, parent_local) = ids::parse(parent_full)?;
    if parent_store != *store_id {
        return Err(RouterError::InvalidRequestStructure(format!(
            "parent stream lives in store '{parent_store}', item lives in '{store_id}'"
        )));
    }
    Ok(Some(parent_local))
}

/// Store-facing listing query with a bare root id and the exclusions that
/// belong to this store.
fn store_scoped_query(
    store_id: &StoreId,
    local_root: Option<String>,
    query: &StreamsQuery,
) -> Result<StreamsQuery> {
    Ok(StreamsQuery {
        id: local_root,
        store_id: None,
        state: query.state,
        excluded_ids: excluded_for(store_id, &query.excluded_ids)?,
    })
}

/// The bare exclusion ids belonging to one store.
fn excluded_for(store_id: &StoreId, excluded: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for full in excluded {
        let (store, local) = ids::parse(full)?;
        if store == *store_id {
            out.push(local);
        }
    }
    Ok(out)
}

/// Re-tag a store-native subtree with the store qualifier, recursively.
/// Pure transform over the owned tree.
fn qualify_tree(store_id: &StoreId, stream: Stream) -> Stream {
    Stream {
        id: ids::build(store_id, &stream.id),
        parent_id: stream
            .parent_id
            .map(|parent| ids::build(store_id, &parent)),
        children: stream
            .children
            .into_iter()
            .map(|child| qualify_tree(store_id, child))
            .collect(),
        ..stream
    }
}

/// Drop excluded nodes (with their subtrees) from an owned forest.
fn prune_excluded(nodes: Vec<Stream>, excluded: &[String]) -> Vec<Stream> {
    if excluded.is_empty() {
        return nodes;
    }
    nodes
        .into_iter()
        .filter(|node| !excluded.contains(&node.id))
        .map(|mut node| {
            node.children = prune_excluded(std::mem::take(&mut node.children), excluded);
            node
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

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

    fn named(name: &str) -> NewStream {
        NewStream::named(name)
    }

    #[tokio::test]
    async fn root_listing_includes_foreign_pseudo_roots() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        streams.create("u1", named("Health")).await.unwrap();

        let roots = streams.get("u1", &StreamsQuery::default()).await.unwrap();
        assert_eq!(roots.len(), 2);
        assert!(roots.iter().any(|s| s.name == "Health"));
        let pseudo = roots.iter().find(|s| s.id == ":vault:*").unwrap();
        assert_eq!(pseudo.name, "Vault");
        assert!(pseudo.children.is_empty());
    }

    #[tokio::test]
    async fn foreign_root_listing_is_wrapped_and_qualified() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();

        let created = streams
            .create("u1", NewStream {
                id: Some(":vault:notes".into()),
                name: "Notes".into(),
                parent_id: None,
                deleted: None,
            })
            .await
            .unwrap();
        assert_eq!(created.id, ":vault:notes");

        let listed = streams
            .get(
                "u1",
                &StreamsQuery {
                    id: Some(":vault:*".into()),
                    ..StreamsQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Vault");
        assert_eq!(listed[0].children[0].id, ":vault:notes");
    }

    #[tokio::test]
    async fn explicit_id_must_match_parent_store() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        let parent = streams.create("u1", named("Local parent")).await.unwrap();

        let result = streams
            .create("u1", NewStream {
                id: Some(":vault:child".into()),
                name: "Child".into(),
                parent_id: Some(parent.id),
                deleted: None,
            })
            .await;
        assert_matches!(result, Err(RouterError::InvalidRequestStructure(_)));
    }

    #[tokio::test]
    async fn duplicate_sibling_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        streams.create("u1", named("Health")).await.unwrap();
        assert_matches!(
            streams.create("u1", named("Health")).await,
            Err(RouterError::ItemAlreadyExists(_))
        );
    }

    #[tokio::test]
    async fn update_keeps_name_without_self_collision() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        let created = streams.create("u1", named("Health")).await.unwrap();

        let mut changed = created.clone();
        changed.trashed = true;
        let updated = streams.update("u1", changed).await.unwrap();
        assert!(updated.trashed);
        assert_eq!(updated.name, "Health");
    }

    #[tokio::test]
    async fn parent_move_across_stores_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        let created = streams.create("u1", named("Health")).await.unwrap();

        let mut moved = created.clone();
        moved.parent_id = Some(":vault:elsewhere".into());
        assert_matches!(
            streams.update("u1", moved).await,
            Err(RouterError::InvalidRequestStructure(_))
        );
    }

    #[tokio::test]
    async fn tombstone_creation_routes_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        let before = Utc::now();

        let tombstone = streams
            .create("u1", NewStream {
                id: Some("gone".into()),
                name: "Gone".into(),
                parent_id: None,
                deleted: Some(Utc::now()),
            })
            .await
            .unwrap();
        assert!(tombstone.deleted.is_some());

        let deletions = streams.get_deletions("u1", before, &[]).await.unwrap();
        assert_eq!(deletions.len(), 1);
        assert_eq!(deletions[0].id, "gone");
    }

    #[tokio::test]
    async fn exclusion_prunes_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        let parent = streams.create("u1", named("Parent")).await.unwrap();
        streams
            .create("u1", NewStream {
                id: None,
                name: "Child".into(),
                parent_id: Some(parent.id.clone()),
                deleted: None,
            })
            .await
            .unwrap();

        let listed = streams
            .get(
                "u1",
                &StreamsQuery {
                    excluded_ids: vec![parent.id.clone()],
                    ..StreamsQuery::default()
                },
            )
            .await
            .unwrap();
        assert!(listed.iter().all(|s| s.id != parent.id));
    }

    #[tokio::test]
    async fn get_one_qualifies_foreign_results() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let streams = router.streams();
        streams
            .create("u1", NewStream {
                id: Some(":vault:notes".into()),
                name: "Notes".into(),
                parent_id: None,
                deleted: None,
            })
            .await
            .unwrap();

        let found = streams.get_one("u1", ":vault:notes").await.unwrap().unwrap();
        assert_eq!(found.id, ":vault:notes");
    }
}
