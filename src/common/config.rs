//! Configuration for shardmeta
//!
//! Values come from an optional TOML file, then `SHARDMETA_*` environment
//! variables (nested keys use `__`, e.g. `SHARDMETA_COORDINATOR__ADDRS`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::paths::BASE_DIR;
use crate::models::ActionGcPolicy;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster namespace every key lives under
    #[serde(default)]
    pub product: String,

    /// Root of the key namespace
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Coordination backend
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Action log retention
    #[serde(default)]
    pub gc: GcConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_dir() -> String {
    BASE_DIR.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Coordination backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Backend name: etcd, memory (zk, zookeeper and etcdv2 are recognized but external)
    #[serde(default = "default_coordinator")]
    pub name: String,

    /// Comma-separated endpoint list
    #[serde(default = "default_addrs")]
    pub addrs: String,

    /// Optional `user:password`
    #[serde(default)]
    pub auth: String,

    /// Per-call timeout; 0 selects the default
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// TTL of the session lease backing ephemeral keys
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
}

fn default_coordinator() -> String {
    "etcd".to_string()
}
fn default_addrs() -> String {
    "127.0.0.1:2379".to_string()
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_session_ttl() -> i64 {
    10
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: default_coordinator(),
            addrs: default_addrs(),
            auth: String::new(),
            timeout_ms: default_timeout_ms(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Action log garbage collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcConfig {
    /// Keep only the newest N actions
    #[serde(default)]
    pub keep: Option<usize>,

    /// Drop actions older than this many seconds
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl GcConfig {
    /// Selected policy; a count bound wins over an age bound
    pub fn policy(&self) -> Option<ActionGcPolicy> {
        match (self.keep, self.max_age_secs) {
            (Some(n), _) => Some(ActionGcPolicy::KeepLast(n)),
            (None, Some(secs)) => Some(ActionGcPolicy::OlderThan(Duration::from_secs(secs))),
            (None, None) => None,
        }
    }
}

impl Config {
    /// Load from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg: Config = builder
            .add_source(
                config::Environment::with_prefix("SHARDMETA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    /// Reject settings that would fail later, before any connection
    pub fn validate(&self) -> crate::Result<()> {
        crate::common::validate_product(&self.product)?;
        match self.coordinator.name.as_str() {
            "etcd" | "memory" | "zk" | "zookeeper" | "etcdv2" => {}
            other => return Err(crate::Error::InvalidCoordinator(other.to_string())),
        }
        if !self.base_dir.starts_with('/') {
            return Err(crate::Error::InvalidConfig(format!(
                "base_dir must be absolute: {}",
                self.base_dir
            )));
        }
        Ok(())
    }
}
