//! # junction-store
//!
//! The store contract consumed by the junction router, plus two concrete
//! backends:
//!
//! - [`sqlite::SqliteStore`] — embedded SQLite under a single-writer
//!   discipline with bounded busy-retry backoff; the usual choice for the
//!   `local` default store
//! - [`memory::MemoryStore`] — in-process maps behind `parking_lot` locks;
//!   used in tests and as a lightweight secondary store
//!
//! A store owns a disjoint namespace of streams and events per user and only
//! ever sees bare local ids — store qualification is the router's business.
//!
//! ## Crate Position
//!
//! Depends on `junction-core`; depended on by `junction-router`.

#![deny(unsafe_code)]

pub mod contract;
pub mod kv;
pub mod memory;
pub mod sqlite;

pub use contract::{
    DataStore, EventPart, EventStream, InitParams, IntegrityFn, StoreDescriptor, StoreError,
    StoreResult, StoreTransaction, StreamPart,
};
pub use kv::KvHandle;
