//! Storage: shared database handle, connection pool, and the memory store.
//!
//! The embedded engine lives behind this module boundary. Everything above
//! it speaks in terms of "open shared database, acquire connection, execute
//! parameterised statement"; the node/edge schema of the property graph is
//! an implementation detail of [`MemoryStore`].

// Allow cast_possible_wrap for usize limits bound as SQL integers.
#![allow(clippy::cast_possible_wrap)]

mod database;
mod row;
mod store;

pub use database::{ConnectionLease, RetryPolicy, SharedDatabase, WriteLease};
pub use store::{MemoryStore, StoreStats, UserStats};
