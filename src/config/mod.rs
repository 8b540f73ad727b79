//! Application configuration.
//!
//! Aggregates the mapping, retry and supervision settings into a single
//! [`Config`] loaded from YAML files and environment variables.

use serde::Deserialize;

use crate::mapping::MappingConfig;
use crate::supervision::SupervisorConfig;
use crate::utils::retry::RetryConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "distmap.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "DISTMAP_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "DISTMAP";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mapping run parameters.
    pub mapping: MappingConfig,
    /// Retry policy for connection creation.
    pub retry: RetryConfig,
    /// Server supervision.
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `distmap.yaml` in the current directory (if it exists)
    /// 2. The file at `path` (if provided)
    /// 3. The file named by `DISTMAP_CONFIG` (if set)
    /// 4. `DISTMAP__SECTION__KEY` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from YAML text, without consulting the
    /// environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
