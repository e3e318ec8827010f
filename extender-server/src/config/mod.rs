//! Configuration module for extender-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::FileConfig;
use extender_core::config::{IngestConfig, PipelineConfig};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Configuration after overrides and validation.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Node API root, always ending with `/` so relative joins keep its path.
    pub node_url: Url,
    pub pipeline: PipelineConfig,
    pub ingest: IngestConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    start_height_override: Option<u64>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, start_height_override: Option<u64>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            start_height_override,
        }
    }

    /// Read the TOML file, apply CLI overrides, and validate.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let file_config: FileConfig = toml::from_str(&config_content)?;
        self.build(file_config)
    }

    fn build(&self, mut file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
        if let Some(start_height) = self.start_height_override {
            file_config.ingest.start_height = start_height;
        }
        validate(&file_config)?;

        Ok(LoadedConfig {
            node_url: with_trailing_slash(file_config.node.url),
            pipeline: file_config.pipeline.normalized(),
            ingest: file_config.ingest,
        })
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let scheme = config.node.url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ConfigError::ValidationError(format!(
            "node url must be http or https, got {scheme}"
        )));
    }
    if config.pipeline.base_coin.is_empty() {
        return Err(ConfigError::ValidationError(
            "pipeline.base_coin must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
