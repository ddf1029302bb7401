//! The HA routing facade called by the proxy on every request.

pub mod table;

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::{HaDescriptor, HaServiceConfig};
use crate::error::HaError;
use crate::policy::RoutingPolicy;
use crate::registry::PolicyRegistry;

pub use table::{ServiceTable, SharedPolicy};

/// Owns the per-service routing policies and the descriptor they came from.
///
/// Request-path operations never fail on an unknown service: they log a
/// diagnostic and degrade to `None` or a no-op so the caller can fall back to
/// direct dispatch. Only [`HaRouter::register_service`] returns a
/// configuration error.
///
/// Reads are lock-free. Writers that change which services are registered
/// (`register_service`, `deregister_service`, `reload`) are serialized, so a
/// service the current descriptor disables never keeps a policy.
#[derive(Debug)]
pub struct HaRouter {
    descriptor: ArcSwap<HaDescriptor>,
    registry: PolicyRegistry,
    services: ServiceTable,
    writer: Mutex<()>,
}

impl HaRouter {
    /// Creates a router with no discovery backends.
    #[must_use]
    pub fn new(descriptor: HaDescriptor) -> Self {
        Self::with_registry(descriptor, PolicyRegistry::new())
    }

    /// Creates a router that builds policies through `registry`.
    #[must_use]
    pub fn with_registry(descriptor: HaDescriptor, registry: PolicyRegistry) -> Self {
        Self {
            descriptor: ArcSwap::from_pointee(descriptor),
            registry,
            services: ServiceTable::new(),
            writer: Mutex::new(()),
        }
    }

    /// Snapshot of the current descriptor.
    #[must_use]
    pub fn descriptor(&self) -> Arc<HaDescriptor> {
        self.descriptor.load_full()
    }

    /// Returns `true` iff the descriptor marks `service` HA-enabled.
    ///
    /// Does not require the service to be registered.
    #[must_use]
    pub fn is_ha_enabled(&self, service: &str) -> bool {
        self.descriptor.load().is_enabled(service)
    }

    /// The service's HA settings, including its failover budget.
    #[must_use]
    pub fn service_config(&self, service: &str) -> Option<HaServiceConfig> {
        self.descriptor.load().service_config(service).cloned()
    }

    /// Builds, seeds and installs the policy for `service`.
    ///
    /// Any policy previously registered under the name is replaced
    /// atomically; requests already holding it finish against it.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Configuration`] if the descriptor has no usable
    /// configuration for the service.
    pub fn register_service(&self, service: &str, urls: Vec<String>) -> Result<(), HaError> {
        let _writer = self.writer.lock();
        let descriptor = self.descriptor.load();
        let config = descriptor
            .service_config(service)
            .ok_or_else(|| HaError::configuration(service, "no HA configuration found"))?;

        let candidates = urls.len();
        let policy = self.registry.build(service, config, urls)?;
        let replaced = self.services.insert(service, Arc::new(policy)).is_some();

        tracing::info!(
            service = %service,
            policy = %config.policy,
            candidates,
            replaced,
            "registered HA service"
        );
        Ok(())
    }

    /// Removes a service. Returns `true` if it was registered.
    pub fn deregister_service(&self, service: &str) -> bool {
        let _writer = self.writer.lock();
        let removed = self.services.remove(service).is_some();
        if removed {
            tracing::info!(service = %service, "deregistered HA service");
        }
        removed
    }

    /// Returns `true` if a policy is installed for `service`.
    #[must_use]
    pub fn is_registered(&self, service: &str) -> bool {
        self.services.get(service).is_some()
    }

    /// Names of all registered services.
    #[must_use]
    pub fn registered_services(&self) -> Vec<String> {
        self.services.names()
    }

    /// The seeded candidates of a registered service.
    #[must_use]
    pub fn candidate_urls(&self, service: &str) -> Option<Vec<String>> {
        self.services.get(service).map(|policy| policy.candidates())
    }

    /// Returns the URL the next request for `service` should go to.
    ///
    /// `None` means either the service is not registered (logged) or it has
    /// no candidates.
    #[must_use]
    pub fn get_active_url(&self, service: &str) -> Option<String> {
        match self.services.get(service) {
            Some(policy) => policy.active_url(),
            None => {
                tracing::warn!(service = %service, "no active URL found, service not registered");
                None
            }
        }
    }

    /// Explicitly designates `url` as the active URL of `service`.
    ///
    /// Unregistered services are a logged no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::InvalidCandidate`] if `url` is not one of the
    /// service's candidates. State is left untouched in that case.
    pub fn set_active_url(&self, service: &str, url: &str) -> Result<(), HaError> {
        let Some(policy) = self.services.get(service) else {
            tracing::warn!(
                service = %service,
                url = %url,
                "cannot set active URL, service not registered"
            );
            return Ok(());
        };
        policy.set_active_url(url).inspect_err(|e| {
            tracing::warn!(service = %service, error = %e, "rejected active URL override");
        })
    }

    /// Reports `url` as unreachable for `service`.
    ///
    /// Unregistered services are a logged no-op.
    pub fn mark_failed_url(&self, service: &str, url: &str) {
        match self.services.get(service) {
            Some(policy) => policy.mark_failed(url),
            None => {
                tracing::warn!(
                    service = %service,
                    url = %url,
                    "cannot mark URL failed, service not registered"
                );
            }
        }
    }

    /// Swaps in a new descriptor and drops services it no longer enables.
    ///
    /// Surviving policies keep their state; re-register them to apply changed
    /// settings. Returns the names of the dropped services.
    pub fn reload(&self, descriptor: HaDescriptor) -> Vec<String> {
        let descriptor = Arc::new(descriptor);
        let _writer = self.writer.lock();
        self.descriptor.store(descriptor.clone());

        let removed = self.services.retain(|service| descriptor.is_enabled(service));
        tracing::info!(
            services = descriptor.len(),
            removed = removed.len(),
            "reloaded HA descriptor"
        );
        removed
    }
}
