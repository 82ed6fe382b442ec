//! Configuration for oxistore daemons

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    pub node_id: String,

    /// Configuration directory (cluster map and bucket metadata live here)
    pub confdir: PathBuf,

    /// Bind address for the control-plane HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: std::net::SocketAddr,

    /// Public endpoint URL (client-facing)
    pub public_url: String,

    /// Intra-cluster control endpoint URL
    #[serde(default)]
    pub intra_url: String,

    /// Cluster-level settings
    #[serde(default)]
    pub cluster: ClusterConf,

    /// Control-plane timeouts
    #[serde(default)]
    pub timeout: TimeoutConf,

    /// Housekeeping cadence
    #[serde(default)]
    pub housekeep: HousekeepConf,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_addr() -> std::net::SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// Cluster-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConf {
    /// Public URL of the current primary; rewritten on every cluster-map
    /// publish so crash-recovering nodes know who to contact.
    #[serde(default)]
    pub primary_url: String,

    /// Information-council size cap
    #[serde(default = "default_ic_size")]
    pub ic_size: usize,
}

fn default_ic_size() -> usize {
    3
}

impl Default for ClusterConf {
    fn default() -> Self {
        Self {
            primary_url: String::new(),
            ic_size: default_ic_size(),
        }
    }
}

/// Control-plane timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConf {
    /// Control-plane operation timeout (begin/abort broadcasts)
    #[serde(default = "default_cplane_ms")]
    pub cplane_ms: u64,

    /// Keepalive timeout (status pulls, IC announcements)
    #[serde(default = "default_keepalive_ms")]
    pub max_keepalive_ms: u64,

    /// Long-operation timeout (commit broadcasts)
    #[serde(default = "default_long_ms")]
    pub long_ms: u64,
}

fn default_cplane_ms() -> u64 {
    2_000
}
fn default_keepalive_ms() -> u64 {
    4_000
}
fn default_long_ms() -> u64 {
    30_000
}

impl Default for TimeoutConf {
    fn default() -> Self {
        Self {
            cplane_ms: default_cplane_ms(),
            max_keepalive_ms: default_keepalive_ms(),
            long_ms: default_long_ms(),
        }
    }
}

impl TimeoutConf {
    pub fn cplane(&self) -> Duration {
        Duration::from_millis(self.cplane_ms)
    }

    pub fn max_keepalive(&self) -> Duration {
        Duration::from_millis(self.max_keepalive_ms)
    }

    pub fn long(&self) -> Duration {
        Duration::from_millis(self.long_ms)
    }
}

/// Housekeeping cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepConf {
    /// Interval between notification-registry housekeeping rounds
    #[serde(default = "default_hk_interval")]
    pub interval_secs: u64,

    /// Finished listeners are kept for `retention_mult * interval_secs`
    #[serde(default = "default_retention_mult")]
    pub retention_mult: u32,
}

fn default_hk_interval() -> u64 {
    120
}
fn default_retention_mult() -> u32 {
    3
}

impl Default for HousekeepConf {
    fn default() -> Self {
        Self {
            interval_secs: default_hk_interval(),
            retention_mult: default_retention_mult(),
        }
    }
}

impl HousekeepConf {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> Duration {
        self.interval() * self.retention_mult
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path of the config file inside `confdir`
    pub fn file_path(&self) -> PathBuf {
        self.confdir.join("oxistore.json")
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node_id.is_empty() {
            return Err(crate::Error::InvalidConfig("node_id is required".into()));
        }
        if self.public_url.is_empty() {
            return Err(crate::Error::InvalidConfig("public_url is required".into()));
        }
        if self.cluster.ic_size == 0 {
            return Err(crate::Error::InvalidConfig(
                "cluster.ic_size must be at least 1".into(),
            ));
        }
        if self.housekeep.interval_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "housekeep.interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Intra-cluster URL, falling back to the public one
    pub fn intra_url(&self) -> &str {
        if self.intra_url.is_empty() {
            &self.public_url
        } else {
            &self.intra_url
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            confdir: PathBuf::from("./oxistore-conf"),
            bind_addr: default_bind_addr(),
            public_url: String::new(),
            intra_url: String::new(),
            cluster: ClusterConf::default(),
            timeout: TimeoutConf::default(),
            housekeep: HousekeepConf::default(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config() -> Config {
        Config {
            node_id: "p1".to_string(),
            public_url: "http://localhost:8080".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(test_config().validate().is_ok());

        let mut bad = test_config();
        bad.node_id.clear();
        assert!(bad.validate().is_err());

        let mut bad = test_config();
        bad.cluster.ic_size = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("oxistore.json");

        let mut config = test_config();
        config.cluster.primary_url = "http://localhost:8080".to_string();
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.node_id, "p1");
        assert_eq!(loaded.cluster.primary_url, "http://localhost:8080");
        assert_eq!(loaded.cluster.ic_size, 3);
        assert_eq!(loaded.timeout.cplane_ms, 2_000);
    }

    #[test]
    fn test_defaults() {
        let config = test_config();
        assert_eq!(config.housekeep.interval_secs, 120);
        assert_eq!(config.housekeep.retention_mult, 3);
        assert_eq!(
            config.housekeep.retention(),
            Duration::from_secs(360)
        );
        assert_eq!(config.intra_url(), "http://localhost:8080");
    }
}
