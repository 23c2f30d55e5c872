//! # albflow-storage
//!
//! SQLite persistence layer for the albflow analytics engine.
//! WAL mode, pooled connections with a FIFO waiter queue, transactional
//! batch insert, keyset pagination, per-query timeouts, schema migrations.

pub mod engine;
pub mod migrations;
pub mod pagination;
pub mod pool;
pub mod queries;
pub mod timeout;

pub use engine::LogStorageEngine;
pub use pool::{ConnectionPool, PooledConnection};
