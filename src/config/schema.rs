//! Configuration schema for aclsync
//!
//! Configuration is stored at `~/.config/aclsync/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache TTLs and timeouts
    pub cache: CacheConfig,

    /// Broker topics and spool location
    pub broker: BrokerConfig,

    /// Outbound event queue
    pub publisher: PublisherConfig,

    /// Event consumer loop
    pub consumer: ConsumerConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL of `team:<id>` projections
    pub team_ttl_secs: u64,

    /// TTL of `asset:<id>:acl` hashes, refreshed on read
    pub acl_ttl_secs: u64,

    /// TTL of `folder:<id>` / `note:<id>` metadata
    pub metadata_ttl_secs: u64,

    /// Upper bound on a single cache call before it counts as a miss
    pub op_timeout_ms: u64,
}

impl CacheConfig {
    pub fn team_ttl(&self) -> Duration {
        Duration::from_secs(self.team_ttl_secs)
    }

    pub fn acl_ttl(&self) -> Duration {
        Duration::from_secs(self.acl_ttl_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            team_ttl_secs: 3600,
            acl_ttl_secs: 86_400,
            metadata_ttl_secs: 300,
            op_timeout_ms: 250,
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Spool directory (defaults to `<state dir>/spool`)
    pub spool_dir: Option<PathBuf>,

    /// Partitions per topic
    pub partitions: u32,

    /// Topic for team activity events
    pub team_topic: String,

    /// Topic for asset change events
    pub asset_topic: String,

    /// Consumer group id
    pub group_id: String,

    /// How often an idle spool subscription re-reads its partitions
    pub poll_interval_ms: u64,
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            spool_dir: None,
            partitions: 4,
            team_topic: "team.activity".to_string(),
            asset_topic: "asset.changes".to_string(),
            group_id: "collab-consumer-group".to_string(),
            poll_interval_ms: 200,
        }
    }
}

/// Publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Total outbound queue capacity, split across workers
    pub queue_capacity: usize,

    /// Worker tasks draining the queue
    pub workers: usize,

    /// Retries per event after the first attempt
    pub max_retries: usize,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    /// Per-attempt publish timeout
    pub publish_timeout_ms: u64,
}

impl PublisherConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            publish_timeout_ms: 5000,
        }
    }
}

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Handler retries before an event is dead-lettered
    pub max_retries: usize,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    /// Appended to a topic name to form its dead-letter topic
    pub dead_letter_suffix: String,

    /// Full cache rebuild interval (0 = disabled)
    pub resync_interval_secs: u64,

    /// Cache snapshot interval for `aclsync inspect` (0 = only on shutdown)
    pub snapshot_interval_secs: u64,

    /// Snapshot file (defaults to `<state dir>/cache-snapshot.json`)
    pub snapshot_path: Option<PathBuf>,

    /// How long shutdown waits for the loops to stop
    pub shutdown_timeout_secs: u64,
}

impl ConsumerConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Dead-letter topic for `topic`
    pub fn dead_letter_topic(&self, topic: &str) -> String {
        format!("{}{}", topic, self.dead_letter_suffix)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            dead_letter_suffix: ".dlq".to_string(),
            resync_interval_secs: 0,
            snapshot_interval_secs: 30,
            snapshot_path: None,
            shutdown_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[broker]"));
        assert!(toml.contains("team.activity"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.broker.group_id, "collab-consumer-group");
        assert_eq!(config.cache.team_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [broker]
            asset_topic = "assets.v2"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.asset_topic, "assets.v2");
        assert_eq!(config.broker.team_topic, "team.activity"); // default preserved
    }

    #[test]
    fn dead_letter_topic_uses_suffix() {
        let consumer = ConsumerConfig::default();
        assert_eq!(consumer.dead_letter_topic("asset.changes"), "asset.changes.dlq");
    }
}
