//! Configuration management for grab

pub mod schema;

pub use schema::Config;

use crate::error::{GrabError, GrabResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Overrides the cache root
pub const ENV_ROOT: &str = "GRAB_ROOT";

/// Overrides `resolve.auto_download`
pub const ENV_AUTO_DOWNLOAD: &str = "GRAB_AUTO_DOWNLOAD";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grab")
            .join("config.toml")
    }

    /// Get the default cache root
    pub fn default_cache_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grab")
            .join("grapes")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grab")
    }

    /// Get the download log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("downloads.log")
    }

    /// Cache root in effect for a config
    pub fn cache_root(config: &Config) -> PathBuf {
        config
            .cache
            .root
            .clone()
            .unwrap_or_else(Self::default_cache_root)
    }

    /// Load configuration, falling back to defaults if the file does not exist
    pub async fn load(&self) -> GrabResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> GrabResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| GrabError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| GrabError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> GrabResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            GrabError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> GrabResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GrabError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `GRAB_*` environment variables on top of file settings
fn apply_env_overrides(config: &mut Config) -> GrabResult<()> {
    if let Some(root) = std::env::var_os(ENV_ROOT).filter(|v| !v.is_empty()) {
        debug!("Cache root overridden by {}", ENV_ROOT);
        config.cache.root = Some(PathBuf::from(root));
    }

    if let Ok(value) = std::env::var(ENV_AUTO_DOWNLOAD) {
        config.resolve.auto_download = parse_bool(&value).ok_or_else(|| {
            GrabError::User(format!(
                "{} must be true or false, got '{}'",
                ENV_AUTO_DOWNLOAD, value
            ))
        })?;
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
