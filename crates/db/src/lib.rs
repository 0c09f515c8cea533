//! `db` crate — SQLite persistence adapter.
//!
//! Implements the engine's `ExecutionStore` trait on top of `sqlx`. Domain
//! records are written as JSON snapshots next to the columns queries filter
//! and order by; no business logic lives here.

pub mod models;
pub mod pool;
pub mod store;

pub use pool::{create_pool, DbPool};
pub use store::SqliteStore;
