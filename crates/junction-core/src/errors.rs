//! Router error taxonomy.
//!
//! Every error that crosses the router boundary is one of these variants —
//! backend-native errors are translated before they reach a caller.

use thiserror::Error;

/// Errors surfaced by the routing layer.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No such store, stream, or event.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Id collision or sibling-name collision.
    #[error("item already exists: {0}")]
    ItemAlreadyExists(String),

    /// Structurally invalid request (cross-store operation, item moved
    /// across stores).
    #[error("invalid request structure: {0}")]
    InvalidRequestStructure(String),

    /// Operation not allowed in this state (e.g. attachments supplied at
    /// event creation time).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The backend reported that an update matched no item.
    #[error("invalid item id: {0}")]
    InvalidItemId(String),

    /// A single query subtree references more than one store.
    #[error("query spans multiple stores: {0}")]
    CrossStoreQuery(String),

    /// An explicit item id disagrees with the store implied by the rest of
    /// the query.
    #[error("conflicting query scope: {0}")]
    ConflictingScope(String),

    /// A store-qualified identifier could not be parsed.
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    /// A store was initialized (or registered) twice.
    #[error("store registry already initialized")]
    AlreadyInitialized,

    /// Catch-all for untranslated backend failures, tagged with the store
    /// that produced them.
    #[error("unexpected failure in store '{store_id}': {message}")]
    Unexpected {
        /// Store the failure originated from.
        store_id: String,
        /// Backend-native error description.
        message: String,
    },
}

/// Convenience alias used throughout the junction crates.
pub type Result<T> = std::result::Result<T, RouterError>;
