//! Gateway configuration file.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! upstream_timeout_ms = 30000
//! health_check_interval_ms = 5000
//!
//! [logging]
//! format = "json"
//!
//! [discovery.zk-main.leaders]
//! HBASE = "http://hbase-1:16010"
//!
//! [ha]
//! WEBHDFS = "enabled=true;maxFailoverAttempts=3;failoverSleep=1000"
//! HBASE = { policy = "leader-tracking", options = { discovery = "zk-main" } }
//!
//! [services.WEBHDFS]
//! urls = ["http://nn-1:50070/webhdfs", "http://nn-2:50070/webhdfs"]
//! ```
//!
//! HA entries accept either the compact parameter string or a table.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use halyard_core::{HaDescriptor, HaError, HaServiceConfig, LeaderBoard, PolicyRegistry};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading the gateway configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// An HA entry is malformed.
    #[error("invalid HA settings for '{service}': {source}")]
    Ha {
        /// Service the entry belongs to.
        service: String,
        /// Parse failure.
        source: HaError,
    },
    /// A value is out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `pretty` (default) or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: default_log_format() }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_upstream_timeout_ms() -> u64 {
    30_000
}

fn default_health_check_interval_ms() -> u64 {
    5_000
}

/// Per-service HA entry: compact parameter string or full table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HaEntry {
    /// `enabled=true;maxFailoverAttempts=3;...`
    Params(String),
    /// Table form of [`HaServiceConfig`].
    Table(HaServiceConfig),
}

/// Static backend list of one service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Candidate URLs in failover order.
    pub urls: Vec<String>,
}

/// A named in-memory leader table with optional startup leaders.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    /// Service -> leader URL published at startup.
    #[serde(default)]
    pub leaders: BTreeMap<String, String>,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Address the proxy listens on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Per-attempt backend timeout.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Health probe period. `0` disables probing.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Named discovery backends for leader-tracking services.
    #[serde(default)]
    pub discovery: BTreeMap<String, DiscoveryConfig>,
    /// HA settings keyed by service name.
    #[serde(default)]
    pub ha: BTreeMap<String, HaEntry>,
    /// Backend URLs keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl GatewayConfig {
    /// Reads and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        raw.parse()
    }

    /// Builds the HA descriptor from the `[ha]` table.
    pub fn descriptor(&self) -> Result<HaDescriptor, ConfigError> {
        let mut builder = HaDescriptor::builder();
        for (service, entry) in &self.ha {
            let config = match entry {
                HaEntry::Params(raw) => raw
                    .parse::<HaServiceConfig>()
                    .map_err(|source| ConfigError::Ha { service: service.clone(), source })?,
                HaEntry::Table(config) => config.clone(),
            };
            builder = builder.service(service.clone(), config);
        }
        Ok(builder.build())
    }

    /// Builds one [`LeaderBoard`] per discovery entry, seeded with its
    /// startup leaders.
    pub fn leader_boards(&self) -> BTreeMap<String, Arc<LeaderBoard>> {
        self.discovery
            .iter()
            .map(|(name, discovery)| {
                let board = Arc::new(LeaderBoard::new());
                for (service, leader) in &discovery.leaders {
                    board.publish(service.clone(), leader.clone());
                }
                (name.clone(), board)
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_timeout_ms == 0 {
            return Err(ConfigError::Invalid("upstream_timeout_ms must be greater than 0".into()));
        }
        if let Some((name, _)) = self.services.iter().find(|(_, s)| s.urls.is_empty()) {
            return Err(ConfigError::Invalid(format!("service '{name}' has no urls")));
        }
        Ok(())
    }
}

/// Builds a policy registry that resolves discovery names to `boards`.
pub fn policy_registry(boards: &BTreeMap<String, Arc<LeaderBoard>>) -> PolicyRegistry {
    boards.iter().fold(PolicyRegistry::new(), |registry, (name, board)| {
        registry.with_discovery(name.clone(), board.clone())
    })
}

impl std::str::FromStr for GatewayConfig {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}
