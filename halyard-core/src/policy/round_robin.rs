//! Round-robin selection with failover.
//!
//! The active URL stays put until it is marked failed. The next call then
//! rotates forward, wrapping, to the first candidate without a failure mark.

use std::time::Duration;

use parking_lot::Mutex;

use crate::error::HaError;
use crate::policy::state::FailoverState;
use crate::policy::RoutingPolicy;

/// Default policy for stateless replica sets.
#[derive(Debug)]
pub struct RoundRobinPolicy {
    service: String,
    state: Mutex<FailoverState>,
}

impl RoundRobinPolicy {
    /// Creates an unseeded policy for `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_readmission(service, None)
    }

    /// Creates a policy whose failure marks expire after `readmit_after`.
    #[must_use]
    pub fn with_readmission(service: impl Into<String>, readmit_after: Option<Duration>) -> Self {
        Self { service: service.into(), state: Mutex::new(FailoverState::new(readmit_after)) }
    }

    /// Number of candidates currently carrying a failure mark.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.state.lock().failed_count()
    }
}

impl RoutingPolicy for RoundRobinPolicy {
    fn seed(&self, urls: Vec<String>) {
        self.state.lock().seed(urls);
    }

    fn active_url(&self) -> Option<String> {
        self.state.lock().select(&self.service).map(str::to_string)
    }

    fn set_active_url(&self, url: &str) -> Result<(), HaError> {
        self.state.lock().set_active(url)?;
        tracing::info!(service = %self.service, url = %url, "active URL set explicitly");
        Ok(())
    }

    fn mark_failed(&self, url: &str) {
        if self.state.lock().mark_failed(url) {
            tracing::info!(service = %self.service, url = %url, "marked URL as failed");
        }
    }

    fn candidates(&self) -> Vec<String> {
        self.state.lock().candidates().to_vec()
    }
}
