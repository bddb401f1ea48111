//! Configuration Loader
//!
//! Layers defaults, an optional TOML file and `DISPATCH__*` environment
//! overrides, then validates the result.
//!
//! Resolution order for the file:
//! 1. explicit path given to [`ConfigLoader::with_path`] (must exist)
//! 2. `DISPATCH_CONFIG_PATH` (must exist)
//! 3. `config/dispatch.toml` (optional)
//!
//! Environment keys use `__` between sections, e.g.
//! `DISPATCH__SCHEDULING__BUFFER_MINUTES=20`.

use super::error::{ConfigResult, ConfigurationError};
use super::DispatchConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "DISPATCH_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/dispatch.toml";
pub const DEFAULT_ENV_PREFIX: &str = "DISPATCH";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Build, deserialize and validate the configuration
    pub fn load(&self) -> ConfigResult<DispatchConfig> {
        let (path, required) = self.resolve_path();
        let environment = Self::detect_environment();

        if required && !path.is_file() {
            return Err(ConfigurationError::ConfigFileNotFound { path });
        }

        debug!(
            path = %path.display(),
            required = required,
            environment = %environment,
            "Loading dispatch configuration"
        );

        let settings = Config::builder()
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: DispatchConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            buffer_minutes = config.scheduling.buffer_minutes,
            reconciliation_interval_seconds = config.reconciliation.interval_seconds,
            restore_backlog_limit = config.restore.backlog_limit,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn resolve_path(&self) -> (PathBuf, bool) {
        if let Some(path) = &self.config_path {
            return (path.clone(), true);
        }
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => (PathBuf::from(path), true),
            _ => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        }
    }

    /// Deployment environment name
    pub fn detect_environment() -> String {
        env::var("DISPATCH_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
