//! Fieldcache Core Business Logic
//!
//! This crate provides the offline-first engine: request classification,
//! the partitioned content store with eviction, the per-partition caching
//! strategies, the durable sync queue and the event bus.

pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod partition;
pub mod strategy;
pub mod sync;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use cache::{CacheStats, ContentStore};
pub use classifier::{Classification, Classifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ApiCategoryConfig, ClassifierConfig, EngineConfig, NetworkSettings, PartitionOverride,
    SyncConfig,
};
pub use dispatcher::{ClientMessage, Command, CommandReply, Dispatcher, PushMessage};
pub use engine::{Engine, EngineStatus};
pub use error::CoreError;
pub use events::{Event, EventBus, EventType, SubscriptionId};
pub use partition::{Partition, PartitionConfig, PartitionRegistry, Strategy};
pub use strategy::{Intercepted, ResponseSource, StrategyExecutor};
pub use sync::{DrainReport, NewAction, SyncQueue, SyncResult};
pub use tasks::{spawn_connectivity_watcher, spawn_maintenance_task};
