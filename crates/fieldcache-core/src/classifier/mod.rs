//! Resource classification
//!
//! Maps a request to the partition that stores it and, for API calls, the
//! category it belongs to. Resolution order: file extension, API category
//! pattern, critical allowlist, then `dynamic`.

mod pattern;

pub use pattern::PathPattern;

use serde::Serialize;
use std::collections::HashSet;

use fieldcache_proxy::ResourceRequest;

use crate::config::ClassifierConfig;
use crate::partition::Partition;

/// Result of classifying a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub partition: Partition,
    /// API category name, set only for the `api` partition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

impl Classification {
    fn partition(partition: Partition) -> Self {
        Self {
            partition,
            resource_type: None,
        }
    }
}

struct ApiCategory {
    name: String,
    patterns: Vec<PathPattern>,
}

/// Request classifier built from the configured tables
pub struct Classifier {
    fonts: HashSet<String>,
    images: HashSet<String>,
    statics: HashSet<String>,
    categories: Vec<ApiCategory>,
    critical: HashSet<String>,
}

fn lowercase_set(items: &[String]) -> HashSet<String> {
    items
        .iter()
        .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let categories = config
            .api_categories
            .iter()
            .map(|c| ApiCategory {
                name: c.name.clone(),
                patterns: c
                    .effective_patterns()
                    .iter()
                    .map(|p| PathPattern::compile(p))
                    .collect(),
            })
            .collect();

        Self {
            fonts: lowercase_set(&config.font_extensions),
            images: lowercase_set(&config.image_extensions),
            statics: lowercase_set(&config.static_extensions),
            categories,
            critical: config.critical_resources.iter().cloned().collect(),
        }
    }

    pub fn classify(&self, request: &ResourceRequest) -> Classification {
        self.classify_path(request.path())
    }

    pub fn classify_path(&self, path: &str) -> Classification {
        if let Some(ext) = extension(path) {
            if self.fonts.contains(&ext) {
                return Classification::partition(Partition::Fonts);
            }
            if self.images.contains(&ext) {
                return Classification::partition(Partition::Images);
            }
            if self.statics.contains(&ext) {
                return Classification::partition(Partition::Static);
            }
        }

        if let Some(category) = self
            .categories
            .iter()
            .find(|c| c.patterns.iter().any(|p| p.matches(path)))
        {
            return Classification {
                partition: Partition::Api,
                resource_type: Some(category.name.clone()),
            };
        }

        if self.critical.contains(path) {
            return Classification::partition(Partition::Critical);
        }

        Classification::partition(Partition::Dynamic)
    }
}

/// Lowercased extension of the last path segment
fn extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiCategoryConfig;

    fn classifier() -> Classifier {
        Classifier::new(&ClassifierConfig::default())
    }

    #[test]
    fn test_classify_scenarios() {
        let c = classifier();

        assert_eq!(
            c.classify_path("/assets/logo.png"),
            Classification::partition(Partition::Images)
        );
        assert_eq!(
            c.classify_path("/api/leads"),
            Classification {
                partition: Partition::Api,
                resource_type: Some("leads".to_string()),
            }
        );
        assert_eq!(
            c.classify_path("/random/page"),
            Classification::partition(Partition::Dynamic)
        );
    }

    #[test]
    fn test_extension_tables() {
        let c = classifier();
        assert_eq!(c.classify_path("/fonts/Inter.WOFF2").partition, Partition::Fonts);
        assert_eq!(c.classify_path("/app/main.js").partition, Partition::Static);
        assert_eq!(c.classify_path("/styles/site.css").partition, Partition::Static);
        // Hidden files and directories with dots are not extensions
        assert_eq!(c.classify_path("/.css").partition, Partition::Dynamic);
        assert_eq!(c.classify_path("/v1.2/page").partition, Partition::Dynamic);
    }

    #[test]
    fn test_extension_wins_over_api_category() {
        let c = classifier();
        assert_eq!(
            c.classify_path("/api/users/avatar.png").partition,
            Partition::Images
        );
    }

    #[test]
    fn test_nested_api_paths_and_graphql() {
        let c = classifier();

        let nested = c.classify_path("/api/deals/42/notes");
        assert_eq!(nested.partition, Partition::Api);
        assert_eq!(nested.resource_type.as_deref(), Some("deals"));

        let gql = c.classify_path("/graphql");
        assert_eq!(gql.resource_type.as_deref(), Some("graphql"));

        assert_eq!(c.classify_path("/api/unknown").partition, Partition::Dynamic);
    }

    #[test]
    fn test_critical_allowlist_is_exact() {
        let c = classifier();
        assert_eq!(c.classify_path("/").partition, Partition::Critical);
        assert_eq!(c.classify_path("/offline.html").partition, Partition::Critical);
        assert_eq!(c.classify_path("/manifest.json").partition, Partition::Critical);
        assert_eq!(c.classify_path("/other.html").partition, Partition::Dynamic);
    }

    #[test]
    fn test_custom_category_patterns() {
        let config = ClassifierConfig {
            api_categories: vec![ApiCategoryConfig {
                name: "search".to_string(),
                patterns: vec!["/v2/*/search".to_string()],
            }],
            ..ClassifierConfig::default()
        };
        let c = Classifier::new(&config);

        let result = c.classify_path("/v2/contacts/search");
        assert_eq!(result.partition, Partition::Api);
        assert_eq!(result.resource_type.as_deref(), Some("search"));
        assert_eq!(c.classify_path("/api/leads").partition, Partition::Dynamic);
    }

    #[test]
    fn test_classify_request_uses_path_only() {
        let c = classifier();
        let request =
            ResourceRequest::get("https://crm.local/api/contacts?page=3#top").unwrap();
        assert_eq!(
            c.classify(&request).resource_type.as_deref(),
            Some("contacts")
        );
    }
}
