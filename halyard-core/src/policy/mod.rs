//! Per-service URL selection policies.
//!
//! A policy owns one service's candidate URLs and failover state. Every
//! operation runs inside the policy's own critical section, so calls against
//! the same service are linearizable and calls against different services
//! never share a lock.

pub mod leader;
pub mod round_robin;
mod state;

use crate::config::PolicyKind;
use crate::error::HaError;

pub use leader::LeaderTrackingPolicy;
pub use round_robin::RoundRobinPolicy;

/// Contract shared by all selection strategies.
pub trait RoutingPolicy: Send + Sync {
    /// Replaces the candidate set. Iteration order is `urls` order.
    fn seed(&self, urls: Vec<String>);

    /// Returns the URL that should receive traffic, or `None` if there are
    /// no candidates.
    fn active_url(&self) -> Option<String>;

    /// Explicitly designates `url` as active and clears its failure mark.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::InvalidCandidate`] without changing any state if
    /// `url` was not seeded.
    fn set_active_url(&self, url: &str) -> Result<(), HaError>;

    /// Reports `url` as unreachable. Unknown URLs and repeated reports are
    /// no-ops.
    fn mark_failed(&self, url: &str);

    /// Snapshot of the seeded candidates in seed order.
    fn candidates(&self) -> Vec<String>;
}

/// Enumerated dispatch over the policy variants, chosen by [`PolicyKind`].
#[derive(Debug)]
pub enum ServicePolicy {
    /// See [`RoundRobinPolicy`].
    RoundRobin(RoundRobinPolicy),
    /// See [`LeaderTrackingPolicy`].
    LeaderTracking(LeaderTrackingPolicy),
}

impl ServicePolicy {
    /// The kind this policy was built from.
    #[must_use]
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::RoundRobin(_) => PolicyKind::RoundRobin,
            Self::LeaderTracking(_) => PolicyKind::LeaderTracking,
        }
    }

    fn inner(&self) -> &dyn RoutingPolicy {
        match self {
            Self::RoundRobin(policy) => policy,
            Self::LeaderTracking(policy) => policy,
        }
    }
}

impl RoutingPolicy for ServicePolicy {
    fn seed(&self, urls: Vec<String>) {
        self.inner().seed(urls);
    }

    fn active_url(&self) -> Option<String> {
        self.inner().active_url()
    }

    fn set_active_url(&self, url: &str) -> Result<(), HaError> {
        self.inner().set_active_url(url)
    }

    fn mark_failed(&self, url: &str) {
        self.inner().mark_failed(url);
    }

    fn candidates(&self) -> Vec<String> {
        self.inner().candidates()
    }
}

impl From<RoundRobinPolicy> for ServicePolicy {
    fn from(policy: RoundRobinPolicy) -> Self {
        Self::RoundRobin(policy)
    }
}

impl From<LeaderTrackingPolicy> for ServicePolicy {
    fn from(policy: LeaderTrackingPolicy) -> Self {
        Self::LeaderTracking(policy)
    }
}
