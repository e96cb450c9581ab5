//! Partitions and caching strategies

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::PartitionOverride;

/// Error type for parsing partition and strategy names
#[derive(Debug, Clone)]
pub struct ParseNameError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseNameError {}

/// Named cache region. Every request resolves to exactly one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Static,
    Dynamic,
    Api,
    Images,
    Fonts,
    Critical,
}

impl Partition {
    pub const ALL: [Partition; 6] = [
        Partition::Static,
        Partition::Dynamic,
        Partition::Api,
        Partition::Images,
        Partition::Fonts,
        Partition::Critical,
    ];

    /// Position in [`Partition::ALL`]
    pub(crate) fn index(&self) -> usize {
        match self {
            Partition::Static => 0,
            Partition::Dynamic => 1,
            Partition::Api => 2,
            Partition::Images => 3,
            Partition::Fonts => 4,
            Partition::Critical => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Static => "static",
            Partition::Dynamic => "dynamic",
            Partition::Api => "api",
            Partition::Images => "images",
            Partition::Fonts => "fonts",
            Partition::Critical => "critical",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(Partition::Static),
            "dynamic" => Ok(Partition::Dynamic),
            "api" => Ok(Partition::Api),
            "images" => Ok(Partition::Images),
            "fonts" => Ok(Partition::Fonts),
            "critical" => Ok(Partition::Critical),
            _ => Err(ParseNameError {
                kind: "partition",
                value: s.to_string(),
            }),
        }
    }
}

/// Decision procedure choosing between cached and fetched content
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from cache; fetch and store only on a miss
    CacheFirst,
    /// Fetch and store; serve from cache only when the network fails
    NetworkFirst,
    /// Serve from cache immediately while refreshing it in the background
    StaleWhileRevalidate,
    /// Serve from cache or report a miss; never touch the network
    CacheOnly,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::CacheOnly => "cache-only",
        }
    }
}

impl FromStr for Strategy {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cache-first" => Ok(Strategy::CacheFirst),
            "network-first" => Ok(Strategy::NetworkFirst),
            "stale-while-revalidate" => Ok(Strategy::StaleWhileRevalidate),
            "cache-only" => Ok(Strategy::CacheOnly),
            _ => Err(ParseNameError {
                kind: "strategy",
                value: s.to_string(),
            }),
        }
    }
}

/// Static configuration of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    pub partition: Partition,
    pub strategy: Strategy,
    pub max_entries: usize,
    pub max_age: Duration,
}

impl PartitionConfig {
    pub fn name(&self) -> &'static str {
        self.partition.as_str()
    }

    /// Built-in settings for a partition
    pub fn default_for(partition: Partition) -> Self {
        let (strategy, max_entries, max_age) = match partition {
            Partition::Static => (Strategy::CacheFirst, 100, Duration::days(30)),
            Partition::Dynamic => (Strategy::StaleWhileRevalidate, 50, Duration::days(7)),
            Partition::Api => (Strategy::NetworkFirst, 200, Duration::minutes(5)),
            Partition::Images => (Strategy::CacheFirst, 100, Duration::days(30)),
            Partition::Fonts => (Strategy::CacheFirst, 20, Duration::days(365)),
            Partition::Critical => (Strategy::CacheOnly, 20, Duration::days(365)),
        };

        Self {
            partition,
            strategy,
            max_entries,
            max_age,
        }
    }
}

/// The six partitions and their settings
#[derive(Debug, Clone)]
pub struct PartitionRegistry {
    configs: [PartitionConfig; 6],
}

impl Default for PartitionRegistry {
    fn default() -> Self {
        Self {
            configs: Partition::ALL.map(PartitionConfig::default_for),
        }
    }
}

impl PartitionRegistry {
    /// Built-in registry with size and age overrides applied, keyed by
    /// partition name. Strategies are fixed per partition.
    pub fn with_overrides(
        overrides: &HashMap<String, PartitionOverride>,
    ) -> Result<Self, ParseNameError> {
        let mut registry = Self::default();
        for (name, o) in overrides {
            let partition: Partition = name.parse()?;
            let config = &mut registry.configs[partition.index()];
            if let Some(max_entries) = o.max_entries {
                config.max_entries = max_entries;
            }
            if let Some(secs) = o.max_age_secs {
                config.max_age = Duration::seconds(secs as i64);
            }
        }
        Ok(registry)
    }

    pub fn get(&self, partition: Partition) -> &PartitionConfig {
        &self.configs[partition.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionConfig> {
        self.configs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_matches_table() {
        let registry = PartitionRegistry::default();

        let api = registry.get(Partition::Api);
        assert_eq!(api.strategy, Strategy::NetworkFirst);
        assert_eq!(api.max_entries, 200);
        assert_eq!(api.max_age, Duration::minutes(5));

        let dynamic = registry.get(Partition::Dynamic);
        assert_eq!(dynamic.strategy, Strategy::StaleWhileRevalidate);
        assert_eq!(dynamic.max_entries, 50);

        let critical = registry.get(Partition::Critical);
        assert_eq!(critical.strategy, Strategy::CacheOnly);
        assert_eq!(critical.max_age, Duration::days(365));

        assert_eq!(registry.get(Partition::Fonts).max_entries, 20);
        assert_eq!(registry.iter().count(), 6);
    }

    #[test]
    fn test_overrides_keep_strategy() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "api".to_string(),
            PartitionOverride {
                max_entries: Some(2),
                max_age_secs: Some(60),
            },
        );

        let registry = PartitionRegistry::with_overrides(&overrides).unwrap();
        let api = registry.get(Partition::Api);
        assert_eq!(api.max_entries, 2);
        assert_eq!(api.max_age, Duration::seconds(60));
        assert_eq!(api.strategy, Strategy::NetworkFirst);
        assert_eq!(registry.get(Partition::Static).max_entries, 100);
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let mut overrides = HashMap::new();
        overrides.insert("videos".to_string(), PartitionOverride::default());
        assert!(PartitionRegistry::with_overrides(&overrides).is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Images".parse::<Partition>().unwrap(), Partition::Images);
        assert!("videos".parse::<Partition>().is_err());
        assert_eq!(
            "stale-while-revalidate".parse::<Strategy>().unwrap(),
            Strategy::StaleWhileRevalidate
        );
        assert!("lru".parse::<Strategy>().is_err());
    }
}
