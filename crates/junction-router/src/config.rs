//! Router configuration.
//!
//! Settings are loaded in three layers (in priority order): compiled
//! defaults, a JSON settings file deep-merged over them, and `JUNCTION_*`
//! environment overrides. Store backends are selected by a `kind` name from
//! a fixed registry of always-compiled implementations — there is no
//! dynamic loading.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use junction_core::{Result, RouterError, StoreId};
use junction_store::memory::MemoryStore;
use junction_store::sqlite::SqliteStore;
use junction_store::{DataStore, StoreDescriptor};

use crate::registry::{Router, RouterBuilder};

/// Store kinds the registry knows how to build.
pub const STORE_KINDS: &[&str] = &["sqlite", "memory"];

/// Top-level router settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    /// Directory holding per-store state files and default databases.
    pub state_dir: PathBuf,
    /// Configured stores. A `local` store is injected when absent.
    pub stores: Vec<StoreSettings>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("junction-state"),
            stores: Vec::new(),
        }
    }
}

/// One configured store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    /// Store id; `local` names the default store.
    pub id: String,
    /// Human-readable name, shown on the federated root node.
    pub name: String,
    /// Backend kind, one of [`STORE_KINDS`].
    pub kind: String,
    /// Backend-specific settings blob.
    #[serde(default)]
    pub settings: Value,
}

/// Recursively merge `overlay` onto `base`. Objects merge key-by-key;
/// everything else is replaced by the overlay value.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from a JSON file, deep-merged over defaults, then apply
/// environment overrides. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<RouterSettings> {
    let defaults = serde_json::to_value(RouterSettings::default()).map_err(config_error)?;
    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(config_error)?;
        let file: Value = serde_json::from_str(&raw).map_err(config_error)?;
        deep_merge(defaults, file)
    } else {
        defaults
    };
    let mut settings: RouterSettings = serde_json::from_value(merged).map_err(config_error)?;

    if let Ok(state_dir) = std::env::var("JUNCTION_STATE_DIR") {
        settings.state_dir = PathBuf::from(state_dir);
    }
    Ok(settings)
}

/// Build and initialize a [`Router`] from settings.
///
/// Every configured store is constructed by kind and registered; a default
/// SQLite `local` store is injected when the configuration names none.
pub async fn assemble(settings: &RouterSettings) -> Result<Router> {
    std::fs::create_dir_all(&settings.state_dir).map_err(config_error)?;

    let mut builder = RouterBuilder::new(&settings.state_dir);
    let mut has_local = false;
    for store_settings in &settings.stores {
        let store_id = StoreId::new(store_settings.id.as_str());
        has_local = has_local || store_id.is_local();
        let store = make_store(
            &store_settings.kind,
            &store_id,
            &settings.state_dir,
            &store_settings.settings,
        )?;
        let mut descriptor = StoreDescriptor::new(store_id, &store_settings.name);
        descriptor.settings = store_settings.settings.clone();
        builder.register(store, descriptor)?;
        info!(store_id = %store_settings.id, kind = %store_settings.kind, "store configured");
    }
    if !has_local {
        let store_id = StoreId::local();
        let store = make_store("sqlite", &store_id, &settings.state_dir, &Value::Null)?;
        builder.register(store, StoreDescriptor::new(store_id, "Local"))?;
    }
    builder.build().await
}

/// The compile-time kind registry.
fn make_store(
    kind: &str,
    store_id: &StoreId,
    state_dir: &Path,
    settings: &Value,
) -> Result<Arc<dyn DataStore>> {
    match kind {
        "sqlite" => {
            let path = settings
                .get("path")
                .and_then(Value::as_str)
                .map_or_else(|| state_dir.join(format!("{store_id}.db")), PathBuf::from);
            let store = SqliteStore::open(&path).map_err(|err| RouterError::Unexpected {
                store_id: store_id.as_str().to_string(),
                message: err.to_string(),
            })?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(RouterError::InvalidRequestStructure(format!(
            "unknown store kind '{other}' for store '{store_id}' (known: {STORE_KINDS:?})"
        ))),
    }
}

fn config_error(err: impl std::fmt::Display) -> RouterError {
    RouterError::Unexpected {
        store_id: String::new(),
        message: format!("configuration error: {err}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
