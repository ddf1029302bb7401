//! HA descriptor models.
//!
//! An [`HaDescriptor`] maps service names to their [`HaServiceConfig`]. It is
//! built once by the configuration loader and shared read-only afterwards.
//!
//! Per-service settings can be deserialized with serde or parsed from the
//! compact parameter form used in topology files:
//!
//! ```text
//! enabled=true;maxFailoverAttempts=3;failoverSleep=1000;policy=leader-tracking;discovery=zk-main
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HaError;

const DEFAULT_MAX_FAILOVER_ATTEMPTS: u32 = 3;
const DEFAULT_FAILOVER_SLEEP_MILLIS: u64 = 1000;
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_SLEEP_MILLIS: u64 = 1000;

/// Option naming the discovery backend a leader-tracking policy reads from.
pub const DISCOVERY_OPTION: &str = "discovery";

/// Option enabling time-based re-admission of failed URLs.
pub const READMIT_AFTER_OPTION: &str = "readmitAfterMillis";

/// Selects which routing policy variant a service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Stateless rotation through candidates, skipping failed ones.
    #[default]
    RoundRobin,
    /// Follows the leader reported by a discovery backend.
    LeaderTracking,
}

impl PolicyKind {
    /// Canonical name used in descriptors and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::LeaderTracking => "leader-tracking",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = HaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "roundrobin" | "default" => Ok(Self::RoundRobin),
            "leader-tracking" | "leader" => Ok(Self::LeaderTracking),
            _ => Err(HaError::InvalidParameter { key: "policy".to_string(), value: s.to_string() }),
        }
    }
}

/// HA settings for a single service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HaServiceConfig {
    /// Whether HA routing is active for the service.
    pub enabled: bool,
    /// How many times one client request may be rerouted to another URL.
    pub max_failover_attempts: u32,
    /// Pause the caller observes between a failure and the rerouted attempt.
    pub failover_sleep_millis: u64,
    /// How many times one client request may be retried against the same URL.
    pub max_retry_attempts: u32,
    /// Pause the caller observes between same-URL retries.
    pub retry_sleep_millis: u64,
    /// Which policy variant to instantiate.
    pub policy: PolicyKind,
    /// Free-form options for the policy variant.
    pub options: BTreeMap<String, String>,
}

impl Default for HaServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failover_attempts: DEFAULT_MAX_FAILOVER_ATTEMPTS,
            failover_sleep_millis: DEFAULT_FAILOVER_SLEEP_MILLIS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_sleep_millis: DEFAULT_RETRY_SLEEP_MILLIS,
            policy: PolicyKind::default(),
            options: BTreeMap::new(),
        }
    }
}

impl HaServiceConfig {
    /// Creates an enabled config with defaults for the given policy.
    #[must_use]
    pub fn new(policy: PolicyKind) -> Self {
        Self { policy, ..Self::default() }
    }

    /// Creates a config that keeps the service out of HA routing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    /// Sets the failover budget.
    #[must_use]
    pub fn with_max_failover_attempts(mut self, attempts: u32) -> Self {
        self.max_failover_attempts = attempts;
        self
    }

    /// Sets the failover sleep in milliseconds.
    #[must_use]
    pub fn with_failover_sleep_millis(mut self, millis: u64) -> Self {
        self.failover_sleep_millis = millis;
        self
    }

    /// Sets the same-URL retry budget.
    #[must_use]
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Sets the same-URL retry sleep in milliseconds.
    #[must_use]
    pub fn with_retry_sleep_millis(mut self, millis: u64) -> Self {
        self.retry_sleep_millis = millis;
        self
    }

    /// Adds a free-form policy option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Pause between a failure and the rerouted attempt.
    #[must_use]
    pub fn failover_sleep(&self) -> Duration {
        Duration::from_millis(self.failover_sleep_millis)
    }

    /// Pause between same-URL retries.
    #[must_use]
    pub fn retry_sleep(&self) -> Duration {
        Duration::from_millis(self.retry_sleep_millis)
    }

    /// Looks up a policy option.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Name of the discovery backend, if one is configured.
    #[must_use]
    pub fn discovery(&self) -> Option<&str> {
        self.option(DISCOVERY_OPTION)
    }

    /// Time after which a failed URL is re-admitted, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::InvalidParameter`] if the option is not a number.
    pub fn readmit_after(&self) -> Result<Option<Duration>, HaError> {
        self.option(READMIT_AFTER_OPTION)
            .map(|raw| parse_number::<u64>(READMIT_AFTER_OPTION, raw).map(Duration::from_millis))
            .transpose()
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, HaError> {
    value.trim().parse().map_err(|_| HaError::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, HaError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(HaError::InvalidParameter { key: key.to_string(), value: value.to_string() }),
    }
}

impl FromStr for HaServiceConfig {
    type Err = HaError;

    /// Parses `key=value` pairs separated by `;`. Unknown keys become options.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Self::default();

        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(HaError::InvalidParameter {
                    key: pair.to_string(),
                    value: String::new(),
                });
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "enabled" => config.enabled = parse_bool(key, value)?,
                "maxFailoverAttempts" => config.max_failover_attempts = parse_number(key, value)?,
                "failoverSleep" => config.failover_sleep_millis = parse_number(key, value)?,
                "maxRetryAttempts" => config.max_retry_attempts = parse_number(key, value)?,
                "retrySleep" => config.retry_sleep_millis = parse_number(key, value)?,
                "policy" => config.policy = value.parse()?,
                _ => {
                    config.options.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(config)
    }
}

/// Immutable mapping from service name to HA settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HaDescriptor {
    services: HashMap<String, HaServiceConfig>,
}

impl HaDescriptor {
    /// Starts building a descriptor.
    #[must_use]
    pub fn builder() -> HaDescriptorBuilder {
        HaDescriptorBuilder::default()
    }

    /// Parses a descriptor from `(service, parameter string)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::InvalidParameter`] if any parameter string is malformed.
    pub fn from_params<I, K, V>(params: I) -> Result<Self, HaError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut services = HashMap::new();
        for (name, raw) in params {
            services.insert(name.into(), raw.as_ref().parse::<HaServiceConfig>()?);
        }
        Ok(Self { services })
    }

    /// Returns the settings for a service, enabled or not.
    #[must_use]
    pub fn service_config(&self, service: &str) -> Option<&HaServiceConfig> {
        self.services.get(service)
    }

    /// Returns `true` if the service exists and is HA-enabled.
    #[must_use]
    pub fn is_enabled(&self, service: &str) -> bool {
        self.services.get(service).is_some_and(|c| c.enabled)
    }

    /// Iterates over the names of HA-enabled services.
    pub fn enabled_services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().filter(|(_, c)| c.enabled).map(|(name, _)| name.as_str())
    }

    /// Number of configured services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no services are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Builder for [`HaDescriptor`].
#[derive(Debug, Default)]
pub struct HaDescriptorBuilder {
    services: HashMap<String, HaServiceConfig>,
}

impl HaDescriptorBuilder {
    /// Adds or replaces a service's settings.
    #[must_use]
    pub fn service(mut self, name: impl Into<String>, config: HaServiceConfig) -> Self {
        self.services.insert(name.into(), config);
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> HaDescriptor {
        HaDescriptor { services: self.services }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_parameter_string() {
        let config: HaServiceConfig = "enabled=true;maxFailoverAttempts=5;failoverSleep=250;\
             maxRetryAttempts=2;retrySleep=100;policy=leader-tracking;discovery=zk-main"
            .parse()
            .unwrap();

        assert!(config.enabled);
        assert_eq!(config.max_failover_attempts, 5);
        assert_eq!(config.failover_sleep(), Duration::from_millis(250));
        assert_eq!(config.max_retry_attempts, 2);
        assert_eq!(config.retry_sleep_millis, 100);
        assert_eq!(config.policy, PolicyKind::LeaderTracking);
        assert_eq!(config.discovery(), Some("zk-main"));
    }

    #[test]
    fn test_parse_defaults_and_whitespace() {
        let config: HaServiceConfig = " enabled = false ; ; ".parse().unwrap();
        assert!(!config.enabled);
        assert_eq!(config.max_failover_attempts, DEFAULT_MAX_FAILOVER_ATTEMPTS);
        assert_eq!(config.failover_sleep_millis, DEFAULT_FAILOVER_SLEEP_MILLIS);
        assert_eq!(config.policy, PolicyKind::RoundRobin);
        assert!(config.options.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        let err = "maxFailoverAttempts=-1".parse::<HaServiceConfig>().unwrap_err();
        assert_eq!(
            err,
            HaError::InvalidParameter {
                key: "maxFailoverAttempts".to_string(),
                value: "-1".to_string()
            }
        );

        assert!("enabled=yes".parse::<HaServiceConfig>().is_err());
        assert!("policy=random".parse::<HaServiceConfig>().is_err());
        assert!("failoverSleep".parse::<HaServiceConfig>().is_err());
    }

    #[test]
    fn test_readmit_after_option() {
        let config = HaServiceConfig::default();
        assert_eq!(config.readmit_after().unwrap(), None);

        let config = config.with_option(READMIT_AFTER_OPTION, "1500");
        assert_eq!(config.readmit_after().unwrap(), Some(Duration::from_millis(1500)));

        let config = HaServiceConfig::default().with_option(READMIT_AFTER_OPTION, "soon");
        assert!(config.readmit_after().is_err());
    }

    #[test]
    fn test_descriptor_lookup() {
        let descriptor = HaDescriptor::from_params([
            ("WEBHDFS", "enabled=true"),
            ("HIVE", "enabled=false"),
        ])
        .unwrap();

        assert_eq!(descriptor.len(), 2);
        assert!(descriptor.is_enabled("WEBHDFS"));
        assert!(!descriptor.is_enabled("HIVE"));
        assert!(!descriptor.is_enabled("OOZIE"));
        assert!(descriptor.service_config("HIVE").is_some());
        assert_eq!(descriptor.enabled_services().collect::<Vec<_>>(), vec!["WEBHDFS"]);
    }

    #[test]
    fn test_descriptor_from_toml() {
        let descriptor: HaDescriptor = toml::from_str(
            r#"
            [WEBHDFS]
            max_failover_attempts = 4
            failover_sleep_millis = 50

            [HBASE]
            policy = "leader-tracking"
            options = { discovery = "zk-main" }
            "#,
        )
        .unwrap();

        let webhdfs = descriptor.service_config("WEBHDFS").unwrap();
        assert!(webhdfs.enabled);
        assert_eq!(webhdfs.max_failover_attempts, 4);
        assert_eq!(webhdfs.failover_sleep_millis, 50);
        assert_eq!(webhdfs.retry_sleep_millis, DEFAULT_RETRY_SLEEP_MILLIS);

        let hbase = descriptor.service_config("HBASE").unwrap();
        assert_eq!(hbase.policy, PolicyKind::LeaderTracking);
        assert_eq!(hbase.discovery(), Some("zk-main"));
    }

    #[test]
    fn test_descriptor_from_toml_rejects_misspelled_keys() {
        let result = toml::from_str::<HaDescriptor>(
            r#"
            [WEBHDFS]
            max_failover_atempts = 9
            "#,
        );
        assert!(result.is_err());
    }
}
