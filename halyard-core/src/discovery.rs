//! Leader discovery contract for active/standby services.
//!
//! The routing core never talks to a coordination service itself. An
//! external client (a ZooKeeper or etcd watcher, an admin API, a health
//! prober) publishes leaders into a [`LeaderDiscovery`] implementation, and
//! leader-tracking policies read from it on the request path. Reads must be
//! non-blocking and must never fail; "don't know" is
//! [`LeaderLookup::Unavailable`].

use std::fmt;

use dashmap::DashMap;

/// Result of asking a discovery backend for a service's leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderLookup {
    /// The backend currently believes this URL is the leader.
    Leader(String),
    /// No information. The policy falls back to local failover.
    Unavailable,
}

/// Source of leader information for leader-tracking policies.
pub trait LeaderDiscovery: Send + Sync + fmt::Debug {
    /// Returns the current leader for `service` without blocking.
    fn resolve_leader(&self, service: &str) -> LeaderLookup;

    /// Best-effort hint that `failed_url` stopped answering for `service`.
    ///
    /// Must return immediately. The default implementation ignores the hint.
    fn request_refresh(&self, service: &str, failed_url: &str) {
        let _ = (service, failed_url);
    }
}

/// In-memory leader table fed by an external coordination client.
///
/// Published leaders are served until a new leader is published. Failure
/// reports do not change the table; they are queued so the feeding client
/// can re-resolve the service or re-admit the leader once it answers again.
#[derive(Debug, Default)]
pub struct LeaderBoard {
    leaders: DashMap<String, String>,
    /// Service -> last URL reported failed since the previous drain.
    refresh_requests: DashMap<String, String>,
}

impl LeaderBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `url` as the leader of `service`.
    pub fn publish(&self, service: impl Into<String>, url: impl Into<String>) {
        let (service, url) = (service.into(), url.into());
        tracing::debug!(service = %service, url = %url, "leader published");
        self.leaders.insert(service, url);
    }

    /// Returns the published leader, if any.
    #[must_use]
    pub fn leader(&self, service: &str) -> Option<String> {
        self.leaders.get(service).map(|entry| entry.value().clone())
    }

    /// Drains pending refresh requests as `(service, failed_url)` pairs.
    pub fn take_refresh_requests(&self) -> Vec<(String, String)> {
        let services: Vec<String> =
            self.refresh_requests.iter().map(|entry| entry.key().clone()).collect();
        services
            .into_iter()
            .filter_map(|service| self.refresh_requests.remove(&service))
            .collect()
    }
}

impl LeaderDiscovery for LeaderBoard {
    fn resolve_leader(&self, service: &str) -> LeaderLookup {
        match self.leader(service) {
            Some(url) => LeaderLookup::Leader(url),
            None => LeaderLookup::Unavailable,
        }
    }

    fn request_refresh(&self, service: &str, failed_url: &str) {
        self.refresh_requests.insert(service.to_string(), failed_url.to_string());
    }
}
