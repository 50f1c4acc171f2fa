use std::{fmt, str::FromStr, sync::Arc};

use serde::Serialize;
use thiserror::Error;

use crate::config::InstanceConfig;

/// Errors related to instance descriptors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InstanceError {
    /// Error when URL is invalid
    #[error("Invalid instance URL: {0}")]
    InvalidUrl(String),
}

/// Result type for instance operations
pub type InstanceResult<T> = Result<T, InstanceError>;

/// A type-safe representation of an instance base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceUrl {
    /// The underlying URL as a string
    url: String,
    /// Whether the URL is secure (HTTPS)
    is_secure: bool,
}

impl InstanceUrl {
    /// Creates a new InstanceUrl if the provided string is an http(s) URL
    pub fn new(url: &str) -> InstanceResult<Self> {
        let is_secure = url.starts_with("https://");
        let is_http = url.starts_with("http://");

        if !is_secure && !is_http {
            return Err(InstanceError::InvalidUrl(format!(
                "Instance URL must start with http:// or https://, got: {url}"
            )));
        }

        Ok(InstanceUrl {
            url: url.to_string(),
            is_secure,
        })
    }

    /// Get the underlying URL as a string reference
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Check if the URL is using HTTPS
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }
}

impl FromStr for InstanceUrl {
    type Err = InstanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceUrl::new(s)
    }
}

impl fmt::Display for InstanceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// One backend endpoint. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    name: String,
    base_url: InstanceUrl,
    credential: String,
}

impl Instance {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        credential: impl Into<String>,
    ) -> InstanceResult<Self> {
        Ok(Self {
            name: name.into(),
            base_url: InstanceUrl::new(base_url)?,
            credential: credential.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &InstanceUrl {
        &self.base_url
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl TryFrom<&InstanceConfig> for Instance {
    type Error = InstanceError;

    fn try_from(config: &InstanceConfig) -> Result<Self, Self::Error> {
        Instance::new(&config.name, &config.url, &config.api_key)
    }
}

/// Informational snapshot of the registry; no live probing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistryHealth {
    pub instances_count: usize,
    pub valid: bool,
}

/// The fixed, read-only list of backend instances. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    instances: Arc<[Instance]>,
}

impl InstanceRegistry {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances: instances.into(),
        }
    }

    /// Build the registry from configuration. Entries with an unusable URL are
    /// skipped with an error log; the validator rejects them before startup.
    pub fn from_config(configs: &[InstanceConfig]) -> Self {
        let instances = configs
            .iter()
            .filter_map(|config| match Instance::try_from(config) {
                Ok(instance) => Some(instance),
                Err(e) => {
                    tracing::error!("Skipping instance '{}': {}", config.name, e);
                    None
                }
            })
            .collect();
        Self::new(instances)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub fn health(&self) -> RegistryHealth {
        RegistryHealth {
            instances_count: self.len(),
            valid: !self.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_url_valid() {
        let url = InstanceUrl::new("http://example.com").expect("Valid HTTP URL should parse");
        assert_eq!(url.as_str(), "http://example.com");
        assert!(!url.is_secure());

        let secure = InstanceUrl::new("https://secure.example.com").expect("Valid HTTPS URL");
        assert!(secure.is_secure());
    }

    #[test]
    fn test_instance_url_invalid() {
        assert!(InstanceUrl::new("example.com").is_err());
        assert!("ftp://example.com".parse::<InstanceUrl>().is_err());
    }

    #[test]
    fn test_registry_from_config_skips_bad_urls() {
        let configs = vec![
            InstanceConfig {
                name: "good".to_string(),
                url: "https://good.example.com".to_string(),
                api_key: "k".to_string(),
            },
            InstanceConfig {
                name: "bad".to_string(),
                url: "good.example.com".to_string(),
                api_key: "k".to_string(),
            },
        ];

        let registry = InstanceRegistry::from_config(&configs);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).map(Instance::name), Some("good"));
        assert_eq!(
            registry.health(),
            RegistryHealth {
                instances_count: 1,
                valid: true
            }
        );
    }

    #[test]
    fn test_empty_registry_health() {
        let registry = InstanceRegistry::default();
        assert!(registry.is_empty());
        assert!(!registry.health().valid);
    }
}
