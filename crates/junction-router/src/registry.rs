//! Store registry.
//!
//! Registration and initialization are two phases: a [`RouterBuilder`]
//! accepts stores, and [`RouterBuilder::build`] consumes it, initializes
//! every store exactly once, and returns an immutable [`Router`]. There is
//! no way to register a store after initialization.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, info_span, warn};

use junction_core::{Result, RouterError, StoreId, integrity};
use junction_store::{DataStore, InitParams, KvHandle, StoreDescriptor};

use crate::events::EventRouter;
use crate::streams::StreamRouter;
use crate::translate::map_store_error;
use crate::txn::TransactionScope;

/// Accumulates store registrations before initialization.
pub struct RouterBuilder {
    state_dir: PathBuf,
    stores: HashMap<StoreId, Arc<dyn DataStore>>,
    descriptors: HashMap<StoreId, StoreDescriptor>,
}

impl RouterBuilder {
    /// Builder writing per-store state files under `state_dir`.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            stores: HashMap::new(),
            descriptors: HashMap::new(),
        }
    }

    /// Register a store under the id carried by its descriptor.
    pub fn register(
        &mut self,
        store: Arc<dyn DataStore>,
        descriptor: StoreDescriptor,
    ) -> Result<()> {
        let id = descriptor.id.clone();
        if self.stores.contains_key(&id) {
            return Err(RouterError::ItemAlreadyExists(format!("store '{id}'")));
        }
        let _ = self.stores.insert(id.clone(), store);
        let _ = self.descriptors.insert(id, descriptor);
        Ok(())
    }

    /// Initialize every registered store and freeze the registry.
    ///
    /// Each store receives its own key/value handle under the state
    /// directory, a span carrying its store id, and the integrity callback.
    pub async fn build(self) -> Result<Router> {
        std::fs::create_dir_all(&self.state_dir).map_err(|err| RouterError::Unexpected {
            store_id: String::new(),
            message: format!("cannot create state dir: {err}"),
        })?;
        for (store_id, store) in &self.stores {
            let kv = KvHandle::open(self.state_dir.join(format!("{store_id}.json")))
                .map_err(|err| map_store_error(store_id, err))?;
            let params = InitParams {
                kv,
                span: info_span!("store", store_id = %store_id),
                integrity: Arc::new(integrity::sign_event),
            };
            store
                .init(params)
                .await
                .map_err(|err| map_store_error(store_id, err))?;
            info!(store_id = %store_id, "store initialized");
        }
        Ok(Router {
            stores: Arc::new(self.stores),
            descriptors: self.descriptors,
        })
    }
}

/// Immutable registry of initialized stores; entry point for all routing.
pub struct Router {
    stores: Arc<HashMap<StoreId, Arc<dyn DataStore>>>,
    descriptors: HashMap<StoreId, StoreDescriptor>,
}

impl Router {
    /// Stream operations view.
    #[must_use]
    pub fn streams(&self) -> StreamRouter<'_> {
        StreamRouter::new(self)
    }

    /// Event operations view.
    #[must_use]
    pub fn events(&self) -> EventRouter<'_> {
        EventRouter::new(self)
    }

    /// Descriptor of one registered store.
    pub fn descriptor(&self, store_id: &StoreId) -> Result<&StoreDescriptor> {
        self.descriptors
            .get(store_id)
            .ok_or_else(|| RouterError::UnknownResource(format!("store '{store_id}'")))
    }

    /// Registered store ids, unordered.
    pub fn store_ids(&self) -> impl Iterator<Item = &StoreId> {
        self.stores.keys()
    }

    pub(crate) fn store(&self, store_id: &StoreId) -> Result<&Arc<dyn DataStore>> {
        self.stores
            .get(store_id)
            .ok_or_else(|| RouterError::UnknownResource(format!("store '{store_id}'")))
    }

    /// Remove a user's data from every store. Best-effort fan-out: all
    /// stores are attempted and the first translated failure is surfaced.
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let mut first_failure = None;
        for (store_id, store) in self.stores.iter() {
            if let Err(err) = store.delete_user(user_id).await {
                warn!(store_id = %store_id, error = %err, "delete_user failed");
                first_failure.get_or_insert(map_store_error(store_id, err));
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Total reported byte usage for a user across all stores.
    pub async fn user_storage_size(&self, user_id: &str) -> Result<u64> {
        let mut total = 0u64;
        for (store_id, store) in self.stores.iter() {
            total += store
                .user_storage_size(user_id)
                .await
                .map_err(|err| map_store_error(store_id, err))?;
        }
        Ok(total)
    }

    /// A fresh, empty transaction scope over the registered stores.
    #[must_use]
    pub fn new_transaction_scope(&self) -> TransactionScope {
        TransactionScope::new(Arc::clone(&self.stores))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use assert_matches::assert_matches;

    use junction_store::memory::MemoryStore;

    use super::*;

    async fn built_router(dir: &std::path::Path) -> Router {
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

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = RouterBuilder::new(dir.path());
        builder
            .register(
                Arc::new(MemoryStore::new()),
                StoreDescriptor::new(StoreId::local(), "Local"),
            )
            .unwrap();
        assert_matches!(
            builder.register(
                Arc::new(MemoryStore::new()),
                StoreDescriptor::new(StoreId::local(), "Local again"),
            ),
            Err(RouterError::ItemAlreadyExists(_))
        );
    }

    #[tokio::test]
    async fn build_initializes_every_store_once() {
        let dir = tempfile::tempdir().unwrap();
        let router = built_router(dir.path()).await;
        assert_eq!(router.store_ids().count(), 2);
        // Re-initializing through the raw store fails: build already did it.
        let store = router.store(&StoreId::local()).unwrap();
        let kv = KvHandle::open(dir.path().join("again.json")).unwrap();
        let result = store
            .init(InitParams {
                kv,
                span: tracing::Span::none(),
                integrity: Arc::new(|_| {}),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn storage_size_sums_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        let router = built_router(dir.path()).await;
        assert_eq!(router.user_storage_size("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn descriptor_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let router = built_router(dir.path()).await;
        assert_eq!(router.descriptor(&StoreId::new("vault")).unwrap().name, "Vault");
        assert_matches!(
            router.descriptor(&StoreId::new("ghost")),
            Err(RouterError::UnknownResource(_))
        );
    }
}
