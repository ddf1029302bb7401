//! Policy factory keyed by [`PolicyKind`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{HaServiceConfig, PolicyKind};
use crate::discovery::LeaderDiscovery;
use crate::error::HaError;
use crate::policy::{LeaderTrackingPolicy, RoundRobinPolicy, RoutingPolicy, ServicePolicy};

/// Builds the policy variant a service's configuration asks for.
///
/// Leader-tracking policies name their discovery backend through the
/// `discovery` option; backends are registered here under those names.
#[derive(Debug, Default, Clone)]
pub struct PolicyRegistry {
    discoveries: HashMap<String, Arc<dyn LeaderDiscovery>>,
}

impl PolicyRegistry {
    /// Creates a registry with no discovery backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a discovery backend under `name`.
    #[must_use]
    pub fn with_discovery(
        mut self,
        name: impl Into<String>,
        discovery: Arc<dyn LeaderDiscovery>,
    ) -> Self {
        self.discoveries.insert(name.into(), discovery);
        self
    }

    /// Looks up a discovery backend by name.
    #[must_use]
    pub fn discovery(&self, name: &str) -> Option<&Arc<dyn LeaderDiscovery>> {
        self.discoveries.get(name)
    }

    /// Instantiates and seeds the policy for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Configuration`] if the service is disabled, an
    /// option is malformed, or a leader-tracking service names an unknown
    /// discovery backend.
    pub fn build(
        &self,
        service: &str,
        config: &HaServiceConfig,
        urls: Vec<String>,
    ) -> Result<ServicePolicy, HaError> {
        if !config.enabled {
            return Err(HaError::configuration(service, "HA is disabled for this service"));
        }
        let readmit_after =
            config.readmit_after().map_err(|e| HaError::configuration(service, e.to_string()))?;

        let policy: ServicePolicy = match config.policy {
            PolicyKind::RoundRobin => {
                RoundRobinPolicy::with_readmission(service, readmit_after).into()
            }
            PolicyKind::LeaderTracking => {
                let name = config.discovery().ok_or_else(|| {
                    HaError::configuration(service, "leader-tracking requires a discovery option")
                })?;
                let discovery = self.discovery(name).cloned().ok_or_else(|| {
                    HaError::configuration(service, format!("unknown discovery backend '{name}'"))
                })?;
                LeaderTrackingPolicy::with_readmission(service, discovery, readmit_after).into()
            }
        };

        tracing::debug!(
            service = %service,
            policy = %config.policy,
            candidates = urls.len(),
            "built routing policy"
        );
        policy.seed(urls);
        Ok(policy)
    }
}
