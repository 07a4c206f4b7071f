//! Store identifiers and the store-qualified id codec.
//!
//! Items that cross the router boundary carry store-qualified identifiers:
//! `:storeId:localId`. Ids belonging to the reserved default store (`local`)
//! carry no qualifier on the wire, so plain ids parse as local. The encoding
//! is reversible: `build(parse(x)) == x` for every valid `x`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RouterError};

/// Reserved id of the default/primary store.
pub const LOCAL_STORE: &str = "local";

/// Delimiter introducing (and terminating) a store qualifier.
const QUALIFIER: char = ':';

/// Identifier of a registered backend store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    /// Create a store id from a raw string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved default store.
    #[must_use]
    pub fn local() -> Self {
        Self(LOCAL_STORE.to_string())
    }

    /// Whether this is the reserved default store.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_STORE
    }

    /// Raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Split a store-qualified identifier into `(store, localId)`.
///
/// Ids without a leading qualifier resolve to the local store. Fails with
/// [`RouterError::MalformedIdentifier`] when a qualifier delimiter is present
/// but the store segment is empty or unterminated.
pub fn parse(full_id: &str) -> Result<(StoreId, String)> {
    let Some(rest) = full_id.strip_prefix(QUALIFIER) else {
        return Ok((StoreId::local(), full_id.to_string()));
    };
    let Some((store, local_id)) = rest.split_once(QUALIFIER) else {
        return Err(RouterError::MalformedIdentifier(format!(
            "'{full_id}' has an unterminated store qualifier"
        )));
    };
    if store.is_empty() {
        return Err(RouterError::MalformedIdentifier(format!(
            "'{full_id}' has an empty store segment"
        )));
    }
    Ok((StoreId::new(store), local_id.to_string()))
}

/// Build the wire form of an identifier: inverse of [`parse`].
///
/// Local-store ids are returned unqualified.
#[must_use]
pub fn build(store_id: &StoreId, local_id: &str) -> String {
    if store_id.is_local() {
        local_id.to_string()
    } else {
        format!("{QUALIFIER}{store_id}{QUALIFIER}{local_id}")
    }
}

/// Parse only the store part of a qualified id.
pub fn store_of(full_id: &str) -> Result<StoreId> {
    parse(full_id).map(|(store, _)| store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
