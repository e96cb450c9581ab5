//! Fieldcache Storage Layer
//!
//! This crate provides the partitioned key/value abstraction that backs the
//! content store, with local disk and in-memory backends.

pub mod backend;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{CacheEntry, EntryStamp, StorageBackend};
pub use error::StorageError;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
