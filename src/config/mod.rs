//! Configuration management for aclsync

pub mod schema;

pub use schema::{
    BrokerConfig, CacheConfig, Config, ConsumerConfig, GeneralConfig, PublisherConfig,
};

use crate::error::{AclError, AclResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

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
            .join("aclsync")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aclsync")
    }

    /// Spool directory configured or defaulted
    pub fn spool_dir(config: &Config) -> PathBuf {
        config
            .broker
            .spool_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("spool"))
    }

    /// Cache snapshot file configured or defaulted
    pub fn snapshot_path(config: &Config) -> PathBuf {
        config
            .consumer
            .snapshot_path
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("cache-snapshot.json"))
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> AclResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> AclResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| AclError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| AclError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> AclResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            AclError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> AclResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AclError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure the spool and snapshot directories exist
    pub async fn ensure_state_dirs(config: &Config) -> AclResult<()> {
        let mut dirs = vec![Self::spool_dir(config)];
        if let Some(parent) = Self::snapshot_path(config).parent() {
            dirs.push(parent.to_path_buf());
        }

        for dir in &dirs {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| AclError::io(format!("creating directory {}", dir.display()), e))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.broker.team_topic, "team.activity");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.broker.group_id = "audit-readers".to_string();

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.broker.group_id, "audit-readers");
    }

    #[tokio::test]
    async fn invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[cache]\nteam_ttl_secs = \"soon\"\n").unwrap();

        let err = ConfigManager::with_path(path.clone()).load().await.unwrap_err();
        match err {
            AclError::ConfigInvalid { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn spool_dir_override() {
        let mut config = Config::default();
        config.broker.spool_dir = Some(PathBuf::from("/tmp/spool"));
        assert_eq!(ConfigManager::spool_dir(&config), PathBuf::from("/tmp/spool"));
    }
}
