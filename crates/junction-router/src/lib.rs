//! # junction-router
//!
//! Federated routing over pluggable data stores. Callers address streams
//! and events with store-qualified identifiers; the router resolves the
//! owning store, dispatches through the store contract, and re-tags results
//! so the federation looks like one tree of streams and one set of events.
//!
//! ## Entry Points
//!
//! - [`config::load_settings`] + [`config::assemble`] — settings-driven
//!   construction
//! - [`RouterBuilder`] — programmatic registration, frozen by `build()`
//! - [`Router::streams`] / [`Router::events`] — the two operation surfaces
//! - [`Router::new_transaction_scope`] — per-operation transaction handles
//!
//! ## Crate Position
//!
//! Depends on `junction-core` (models, errors, id codec) and
//! `junction-store` (store contract and backends). Upstream API surfaces
//! consume this crate.

#![deny(unsafe_code)]

pub mod config;
pub mod decompose;
pub mod events;
pub mod registry;
pub mod streams;
pub mod translate;
pub mod txn;

pub use config::{RouterSettings, StoreSettings, assemble, load_settings};
pub use decompose::decompose_by_store;
pub use events::{EventRouter, EventsUpdate, RouterEventStream};
pub use registry::{Router, RouterBuilder};
pub use streams::StreamRouter;
pub use translate::map_store_error;
pub use txn::TransactionScope;
