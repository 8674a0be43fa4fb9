//! Configuration management for portwrap

mod serde_utils;
mod session;

pub use session::{HostKeyPolicy, SessionConfig, SessionSettings, DEFAULT_SSH_PORT};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("portwrap")
}

/// Get the default session settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("session.toml")
}

/// Load configuration from a TOML file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load raw session settings from a TOML file
pub fn load_settings(path: &Path) -> Result<SessionSettings, ConfigError> {
    let settings: SessionSettings = load_config(path)?;
    tracing::debug!("Loaded session settings from {:?}", path);
    Ok(settings)
}
