//! Partitioned content store and eviction

mod eviction;
mod store;

pub use eviction::select_victims;
pub use store::{CacheStats, ContentStore};
