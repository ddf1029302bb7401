//! Lock-free service table.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::policy::ServicePolicy;

/// A shared reference to one service's policy.
pub type SharedPolicy = Arc<ServicePolicy>;

/// Maps service names to their routing policy.
///
/// Readers load the current map without taking any lock and clone the
/// policy `Arc` out of it, so a concurrent replacement never tears a read:
/// the reader finishes against whichever policy it loaded. Writers publish a
/// new map with read-copy-update.
#[derive(Debug, Default)]
pub struct ServiceTable {
    services: ArcSwap<HashMap<String, SharedPolicy>>,
}

impl ServiceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a service's policy.
    pub fn get(&self, service: &str) -> Option<SharedPolicy> {
        self.services.load().get(service).cloned()
    }

    /// Atomically install `policy`, returning the one it replaced.
    pub fn insert(&self, service: &str, policy: SharedPolicy) -> Option<SharedPolicy> {
        let previous = self.services.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(service.to_string(), policy.clone());
            next
        });
        previous.get(service).cloned()
    }

    /// Atomically remove a service, returning its policy.
    pub fn remove(&self, service: &str) -> Option<SharedPolicy> {
        let previous = self.services.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(service);
            next
        });
        previous.get(service).cloned()
    }

    /// Atomically drop every service for which `keep` returns `false`.
    ///
    /// Returns the names that were removed.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let previous = self.services.rcu(|current| {
            current
                .iter()
                .filter(|(name, _)| keep(name.as_str()))
                .map(|(name, policy)| (name.clone(), policy.clone()))
                .collect::<HashMap<_, _>>()
        });
        previous.keys().filter(|name| !keep(name.as_str())).cloned().collect()
    }

    /// Names of all registered services.
    pub fn names(&self) -> Vec<String> {
        self.services.load().keys().cloned().collect()
    }
}
