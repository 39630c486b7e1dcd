//! Job status persistence for the staging pipeline.
//!
//! This crate provides the status registry and its storage backends.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory SurrealDB for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod registry;
pub mod repositories;
mod schema;
mod store;

pub use connection::{Database, DbConfig, DbError, connect};
pub use registry::StatusRegistry;
pub use repositories::SurrealJobStore;
pub use schema::init_schema;
pub use store::{JobStore, MemoryJobStore, StoreFuture};
