//! Transaction scopes.
//!
//! A scope lazily opens one backend-native transaction per store it touches.
//! There is no cross-store coordination: each store commits or rolls back on
//! its own, and a failure after another store has already committed leaves
//! the stores divergent. Callers needing atomicity stay within one store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use junction_core::{Result, RouterError, StoreId};
use junction_store::{DataStore, StoreTransaction};

use crate::translate::map_store_error;

/// Per-operation handle over lazily created backend transactions.
pub struct TransactionScope {
    stores: Arc<HashMap<StoreId, Arc<dyn DataStore>>>,
    open: Mutex<HashMap<StoreId, Arc<dyn StoreTransaction>>>,
}

impl TransactionScope {
    pub(crate) fn new(stores: Arc<HashMap<StoreId, Arc<dyn DataStore>>>) -> Self {
        Self {
            stores,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// The cached sub-transaction for `store_id`, beginning one on first use.
    pub async fn store_transaction(&self, store_id: &StoreId) -> Result<Arc<dyn StoreTransaction>> {
        let mut open = self.open.lock().await;
        if let Some(existing) = open.get(store_id) {
            return Ok(Arc::clone(existing));
        }
        let store = self
            .stores
            .get(store_id)
            .ok_or_else(|| RouterError::UnknownResource(format!("store '{store_id}'")))?;
        let tx: Arc<dyn StoreTransaction> = Arc::from(
            store
                .begin_transaction()
                .await
                .map_err(|err| map_store_error(store_id, err))?,
        );
        let _ = open.insert(store_id.clone(), Arc::clone(&tx));
        Ok(tx)
    }

    /// Commit every open sub-transaction. Best-effort: the first failure is
    /// surfaced after all stores have been attempted.
    pub async fn commit_all(&self) -> Result<()> {
        let open = std::mem::take(&mut *self.open.lock().await);
        let mut first_failure = None;
        for (store_id, tx) in open {
            if let Err(err) = tx.commit().await {
                warn!(store_id = %store_id, error = %err, "transaction commit failed");
                first_failure.get_or_insert(map_store_error(&store_id, err));
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Roll back every open sub-transaction, best-effort.
    pub async fn rollback_all(&self) -> Result<()> {
        let open = std::mem::take(&mut *self.open.lock().await);
        let mut first_failure = None;
        for (store_id, tx) in open {
            if let Err(err) = tx.rollback().await {
                warn!(store_id = %store_id, error = %err, "transaction rollback failed");
                first_failure.get_or_insert(map_store_error(&store_id, err));
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
