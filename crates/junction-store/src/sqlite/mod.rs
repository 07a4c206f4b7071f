//! Embedded SQLite backend.
//!
//! Layout follows the repository pattern: stateless repos over
//! `&Connection`, a pooled connection layer, versioned migrations, and a
//! store facade that serializes writes through one in-process lock with
//! bounded busy-retry backoff.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use store::SqliteStore;
