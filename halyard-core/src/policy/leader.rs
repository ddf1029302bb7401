//! Leader-tracking selection for active/standby pairs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::discovery::{LeaderDiscovery, LeaderLookup};
use crate::error::HaError;
use crate::policy::state::FailoverState;
use crate::policy::RoutingPolicy;

/// Routes to the leader reported by a discovery backend.
///
/// When discovery has nothing to say, or names a URL that is not a candidate
/// or is locally marked failed, selection falls back to round-robin failover
/// over the seeded candidates.
#[derive(Debug)]
pub struct LeaderTrackingPolicy {
    service: String,
    state: Mutex<FailoverState>,
    discovery: Arc<dyn LeaderDiscovery>,
}

impl LeaderTrackingPolicy {
    /// Creates an unseeded policy reading leaders from `discovery`.
    #[must_use]
    pub fn new(service: impl Into<String>, discovery: Arc<dyn LeaderDiscovery>) -> Self {
        Self::with_readmission(service, discovery, None)
    }

    /// Creates a policy whose failure marks expire after `readmit_after`.
    #[must_use]
    pub fn with_readmission(
        service: impl Into<String>,
        discovery: Arc<dyn LeaderDiscovery>,
        readmit_after: Option<Duration>,
    ) -> Self {
        Self {
            service: service.into(),
            state: Mutex::new(FailoverState::new(readmit_after)),
            discovery,
        }
    }
}

impl RoutingPolicy for LeaderTrackingPolicy {
    fn seed(&self, urls: Vec<String>) {
        self.state.lock().seed(urls);
    }

    fn active_url(&self) -> Option<String> {
        let lookup = self.discovery.resolve_leader(&self.service);
        let mut state = self.state.lock();

        if let LeaderLookup::Leader(leader) = lookup {
            match state.position(&leader) {
                Some(index) if !state.is_failed(index) => {
                    if state.current() != Some(leader.as_str()) {
                        tracing::info!(
                            service = %self.service,
                            url = %leader,
                            "following new leader"
                        );
                        state.activate(index);
                    }
                    return Some(leader);
                }
                Some(_) => {
                    tracing::debug!(
                        service = %self.service,
                        url = %leader,
                        "reported leader is marked failed, using local failover"
                    );
                }
                None => {
                    tracing::warn!(
                        service = %self.service,
                        url = %leader,
                        "reported leader is not a candidate URL, ignoring"
                    );
                }
            }
        }

        state.select(&self.service).map(str::to_string)
    }

    fn set_active_url(&self, url: &str) -> Result<(), HaError> {
        self.state.lock().set_active(url)?;
        tracing::info!(service = %self.service, url = %url, "active URL set explicitly");
        Ok(())
    }

    fn mark_failed(&self, url: &str) {
        let newly_marked = self.state.lock().mark_failed(url);
        if newly_marked {
            tracing::info!(
                service = %self.service,
                url = %url,
                "marked leader candidate as failed"
            );
            self.discovery.request_refresh(&self.service, url);
        }
    }

    fn candidates(&self) -> Vec<String> {
        self.state.lock().candidates().to_vec()
    }
}
