//! Named response caches.
//!
//! This module provides the storage side of the worker:
//! - Caches are named and grouped into generations by the worker config
//! - Entries are keyed by request identity (GET + URL, honouring `Vary`)
//! - Storage is SQLite, either on disk or in memory

mod identity;
mod storage;
mod traits;

pub use identity::RequestKey;
pub use storage::SqliteStore;
pub use traits::{CacheStore, EntrySummary, ResponseSource};
