use std::path::{Path, PathBuf};

use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Environment variable holding a complete JSON configuration document.
pub const ENV_INSTANCES: &str = "OPENAI_INSTANCES";
/// Environment variable pointing at a configuration file.
pub const ENV_CONFIG_PATH: &str = "OPENAI_CONFIG_PATH";
pub const ENV_API_KEY: &str = "API_KEY";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";

/// Locations probed when neither the environment nor the command line names a file.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/config/openai_instances.json",
    "./config/openai_instances.json",
];

/// Raw inputs for configuration resolution, captured once at startup.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub instances_json: Option<String>,
    pub config_path: Option<String>,
    pub api_key: Option<String>,
    pub log_level: Option<String>,
    pub listen_addr: Option<String>,
    pub default_paths: Vec<PathBuf>,
}

impl ConfigSources {
    /// Snapshot the process environment. An explicit path (from the command line)
    /// wins over `OPENAI_CONFIG_PATH`.
    pub fn from_env(explicit_path: Option<&str>) -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            instances_json: var(ENV_INSTANCES),
            config_path: explicit_path.map(str::to_string).or_else(|| var(ENV_CONFIG_PATH)),
            api_key: var(ENV_API_KEY),
            log_level: var(ENV_LOG_LEVEL),
            listen_addr: var(ENV_LISTEN_ADDR),
            default_paths: DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Which source supplied the configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    Environment,
    File(PathBuf),
    Defaults,
}

/// Load configuration from the process environment and an optional file path.
pub fn load_config(explicit_path: Option<&str>) -> Result<(GatewayConfig, ConfigOrigin)> {
    load_config_from(&ConfigSources::from_env(explicit_path))
}

/// Resolve the configuration document in priority order:
/// inline JSON, explicit file, default paths, built-in defaults.
pub fn load_config_from(sources: &ConfigSources) -> Result<(GatewayConfig, ConfigOrigin)> {
    let mut builder = Config::builder();
    let mut origin = ConfigOrigin::Defaults;

    if let Some(json) = &sources.instances_json {
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(_) => {
                builder = builder.add_source(File::from_str(json, FileFormat::Json));
                origin = ConfigOrigin::Environment;
            }
            Err(e) => {
                tracing::error!("{ENV_INSTANCES} contains invalid JSON, ignoring it: {e}");
            }
        }
    }

    if origin == ConfigOrigin::Defaults {
        if let Some(path) = &sources.config_path {
            let path = Path::new(path);
            if path.exists() {
                builder = add_file_source(builder, path)?;
                origin = ConfigOrigin::File(path.to_path_buf());
            } else {
                tracing::warn!("Configuration file {} does not exist", path.display());
            }
        }
    }

    if origin == ConfigOrigin::Defaults {
        if let Some(path) = sources.default_paths.iter().find(|p| p.exists()) {
            builder = add_file_source(builder, path)?;
            origin = ConfigOrigin::File(path.clone());
        }
    }

    if origin == ConfigOrigin::Defaults {
        tracing::warn!("No OpenAI instances configuration found");
    }

    let settings = builder
        .set_override_option("api_key", sources.api_key.clone())?
        .set_override_option("logging.level", sources.log_level.clone())?
        .set_override_option("listen_addr", sources.listen_addr.clone())?
        .build()
        .context("Failed to build gateway configuration")?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize configuration from {origin:?}"))?;

    Ok((gateway_config, origin))
}

/// Load a single configuration file, without consulting the environment.
pub fn load_config_file(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);
    let settings = add_file_source(Config::builder(), path)?
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))
}

fn add_file_source(
    builder: ConfigBuilder<DefaultState>,
    config_path: &Path,
) -> Result<ConfigBuilder<DefaultState>> {
    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Json,
    };

    let path_str = config_path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?;

    Ok(builder.add_source(File::new(path_str, format)))
}
