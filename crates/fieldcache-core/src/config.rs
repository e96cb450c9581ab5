//! Engine configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use fieldcache_proxy::NetworkConfig;

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Origin that relative resource paths (precache list, offline page)
    /// are resolved against
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Per-partition size and age overrides, keyed by partition name
    #[serde(default)]
    pub partitions: HashMap<String, PartitionOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            network: NetworkSettings::default(),
            sync: SyncConfig::default(),
            classifier: ClassifierConfig::default(),
            partitions: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Resolve a path such as `/offline.html` against the origin
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.origin.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }
}

/// Network timeout and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_network_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_network_retries(),
            base_delay_ms: default_base_delay_ms(),
            skip_tls_verify: false,
        }
    }
}

impl NetworkSettings {
    pub fn to_network_config(&self) -> NetworkConfig {
        NetworkConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

/// Sync queue and background task settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attempts a queued action gets before it is dropped
    #[serde(default = "default_action_retries")]
    pub max_retries: u32,
    /// Interval of the maintenance task (expiry sweep and queue drain)
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    /// Fetch the critical resources into the `critical` partition on start
    #[serde(default = "default_true")]
    pub precache_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_action_retries(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            precache_on_start: true,
        }
    }
}

/// One row of the API category table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiCategoryConfig {
    /// Category name, reported as the resource type (e.g. "leads")
    pub name: String,
    /// Path patterns (`*` = one segment, `**` = any number of segments).
    /// If empty, defaults to `/api/{name}` and `/api/{name}/**`.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl ApiCategoryConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            patterns: Vec::new(),
        }
    }

    pub fn effective_patterns(&self) -> Vec<String> {
        if self.patterns.is_empty() {
            vec![
                format!("/api/{}", self.name),
                format!("/api/{}/**", self.name),
            ]
        } else {
            self.patterns.clone()
        }
    }
}

/// Tables used by the resource classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_font_extensions")]
    pub font_extensions: Vec<String>,
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,
    #[serde(default = "default_api_categories")]
    pub api_categories: Vec<ApiCategoryConfig>,
    /// Exact paths served from the `critical` partition
    #[serde(default = "default_critical_resources")]
    pub critical_resources: Vec<String>,
    /// Page served to navigations when nothing else is available
    #[serde(default = "default_offline_page")]
    pub offline_page: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            font_extensions: default_font_extensions(),
            image_extensions: default_image_extensions(),
            static_extensions: default_static_extensions(),
            api_categories: default_api_categories(),
            critical_resources: default_critical_resources(),
            offline_page: default_offline_page(),
        }
    }
}

/// Size and age override for one partition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionOverride {
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

// Default value functions
fn default_origin() -> String {
    "http://localhost:4000".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_network_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_action_retries() -> u32 {
    3
}

fn default_maintenance_interval_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_font_extensions() -> Vec<String> {
    strings(&["woff", "woff2", "ttf", "otf", "eot"])
}

fn default_image_extensions() -> Vec<String> {
    strings(&["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif", "bmp"])
}

fn default_static_extensions() -> Vec<String> {
    strings(&["js", "mjs", "css", "map", "wasm", "txt"])
}

fn default_api_categories() -> Vec<ApiCategoryConfig> {
    let mut categories: Vec<ApiCategoryConfig> = [
        "contacts",
        "deals",
        "leads",
        "companies",
        "tasks",
        "activities",
        "notes",
        "reports",
        "dashboard",
        "users",
    ]
    .iter()
    .map(|name| ApiCategoryConfig::new(name))
    .collect();

    categories.push(ApiCategoryConfig {
        name: "graphql".to_string(),
        patterns: strings(&["/graphql", "/api/graphql"]),
    });

    categories
}

fn default_critical_resources() -> Vec<String> {
    strings(&["/", "/index.html", "/offline.html", "/manifest.json"])
}

fn default_offline_page() -> String {
    "/offline.html".to_string()
}
