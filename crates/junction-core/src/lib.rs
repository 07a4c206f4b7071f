//! # junction-core
//!
//! Foundation types for the junction federated storage router.
//!
//! This crate provides the shared vocabulary that the store and router crates
//! depend on:
//!
//! - **Identifiers**: [`ids::StoreId`] and the reversible `:storeId:localId`
//!   wire encoding for store-qualified item ids
//! - **Errors**: [`errors::RouterError`] taxonomy via `thiserror`
//! - **Events**: [`event::Event`], [`event::NewEvent`], [`event::AttachmentItem`]
//! - **Streams**: [`stream::Stream`], [`stream::NewStream`] hierarchy nodes
//! - **Queries**: [`query::EventsQuery`], [`query::StreamsQuery`], and the
//!   boolean [`query::StreamQuery`] expression with canonical normalization
//! - **Integrity**: [`integrity::compute_event_digest`] tamper-evidence hash
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `junction-store` and `junction-router`.

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod integrity;
pub mod query;
pub mod stream;

pub use errors::{Result, RouterError};
pub use ids::{LOCAL_STORE, StoreId};
