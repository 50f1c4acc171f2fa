//! Configuration data structures for the gateway.
//!
//! These types map directly to JSON (also YAML / TOML) configuration files. They are
//! serde‑friendly and carry defaults so that a minimal `{"instances": [...]}` document
//! is a complete configuration.
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

/// One backend instance as written in configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Unique name used in logs and the tried-set
    pub name: String,
    /// Base URL, e.g. `https://my-resource.openai.azure.com`
    pub url: String,
    /// Credential sent to the backend as the `api-key` header
    pub api_key: String,
}

/// Instance selection policy for the buffered forwarding path.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Uniform random draw without replacement, last failure surfaced on exhaustion
    #[default]
    Random,
    /// Fixed rotation, one attempt per instance, generic failure on exhaustion
    RoundRobin,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStrategy::Random => write!(f, "random"),
            SelectionStrategy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// Settings of the shared outbound client pool.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound for one attempt (and the idle gap between streamed chunks)
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    /// How long `close()` waits for in-flight calls before aborting them
    pub drain_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 600,
            connect_timeout_secs: 10,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 20,
            drain_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Inbound bearer token. `None` (or empty) disables the gate.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub strategy: SelectionStrategy,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// The inbound bearer token, treating an empty string as unset.
    pub fn inbound_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_key: None,
            strategy: SelectionStrategy::default(),
            instances: Vec::new(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for GatewayConfig, mostly used by tests and embedders
#[derive(Default)]
pub struct GatewayConfigBuilder {
    listen_addr: Option<String>,
    api_key: Option<String>,
    strategy: SelectionStrategy,
    instances: Vec<InstanceConfig>,
    client: Option<ClientConfig>,
    logging: Option<LoggingConfig>,
}

impl GatewayConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Require `Authorization: Bearer <key>` on forwarded routes
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Add a backend instance
    pub fn instance(
        mut self,
        name: impl Into<String>,
        url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        self.instances.push(InstanceConfig {
            name: name.into(),
            url: url.into(),
            api_key: api_key.into(),
        });
        self
    }

    pub fn client(mut self, config: ClientConfig) -> Self {
        self.client = Some(config);
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            listen_addr: self.listen_addr.unwrap_or_else(default_listen_addr),
            api_key: self.api_key,
            strategy: self.strategy,
            instances: self.instances,
            client: self.client.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        }
    }
}
