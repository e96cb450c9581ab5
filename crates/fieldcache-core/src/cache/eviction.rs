//! Oldest-insertion eviction
//!
//! Entries are ordered by write time, not by last access. Entries without a
//! timestamp sort first; ties are broken by key.

use fieldcache_storage::{EntryStamp, StorageBackend};
use tracing::{debug, warn};

use crate::partition::PartitionConfig;

/// Keys to delete so that at most `max_entries` remain
pub fn select_victims(mut stamps: Vec<EntryStamp>, max_entries: usize) -> Vec<String> {
    if stamps.len() <= max_entries {
        return Vec::new();
    }

    let excess = stamps.len() - max_entries;
    stamps.sort_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.key.cmp(&b.key)));
    stamps.into_iter().take(excess).map(|s| s.key).collect()
}

/// Trim a partition down to its entry budget. Returns the number of entries
/// removed. Failures are logged and skipped.
pub(crate) async fn enforce(storage: &dyn StorageBackend, config: &PartitionConfig) -> usize {
    let stamps = match storage.list_stamps(config.name()).await {
        Ok(stamps) => stamps,
        Err(e) => {
            warn!("Failed to list partition {} for eviction: {}", config.name(), e);
            return 0;
        }
    };

    let victims = select_victims(stamps, config.max_entries);
    if victims.is_empty() {
        return 0;
    }

    let mut evicted = 0;
    for key in &victims {
        debug!("Evicting {} from {}", key, config.name());
        match storage.delete(config.name(), key).await {
            Ok(_) => evicted += 1,
            Err(e) => warn!("Failed to evict {} from {}: {}", key, config.name(), e),
        }
    }

    debug!(
        "Evicted {} entries from {} (limit: {})",
        evicted,
        config.name(),
        config.max_entries
    );
    evicted
}
