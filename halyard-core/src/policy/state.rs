//! Candidate bookkeeping shared by the policy variants.
//!
//! Callers hold the owning policy's mutex for every method here, so each
//! method is one atomic transition of the service's failover state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::HaError;

/// Ordered candidates plus the active index, rotation cursor and failure marks.
#[derive(Debug, Default)]
pub(crate) struct FailoverState {
    candidates: Vec<String>,
    active: Option<usize>,
    cursor: usize,
    /// Candidate index -> time it was first marked failed.
    failed: HashMap<usize, Instant>,
    readmit_after: Option<Duration>,
}

impl FailoverState {
    pub(crate) fn new(readmit_after: Option<Duration>) -> Self {
        Self { readmit_after, ..Self::default() }
    }

    /// Replaces the candidate set and forgets all selection state.
    ///
    /// Duplicate URLs keep their first position.
    pub(crate) fn seed(&mut self, urls: Vec<String>) {
        let mut candidates: Vec<String> = Vec::with_capacity(urls.len());
        for url in urls {
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }
        self.candidates = candidates;
        self.active = None;
        self.cursor = 0;
        self.failed.clear();
    }

    pub(crate) fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub(crate) fn position(&self, url: &str) -> Option<usize> {
        self.candidates.iter().position(|c| c == url)
    }

    pub(crate) fn is_failed(&self, index: usize) -> bool {
        self.failed.contains_key(&index)
    }

    pub(crate) fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Current active URL without selecting a new one.
    pub(crate) fn current(&self) -> Option<&str> {
        self.active.map(|i| self.candidates[i].as_str())
    }

    /// Makes `index` active and moves the cursor past it.
    pub(crate) fn activate(&mut self, index: usize) {
        self.failed.remove(&index);
        self.active = Some(index);
        self.cursor = (index + 1) % self.candidates.len();
    }

    /// Returns the active URL, selecting the next healthy candidate if needed.
    ///
    /// When every candidate is marked failed the marks are dropped and the
    /// first candidate is selected, so a fully failed pool never wedges.
    pub(crate) fn select(&mut self, service: &str) -> Option<&str> {
        if self.candidates.is_empty() {
            return None;
        }
        self.readmit_expired(service);

        if let Some(index) = self.active {
            if !self.is_failed(index) {
                return Some(&self.candidates[index]);
            }
            self.active = None;
        }

        let len = self.candidates.len();
        let next = (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .find(|index| !self.failed.contains_key(index));

        let chosen = match next {
            Some(index) => index,
            None => {
                tracing::warn!(
                    service = %service,
                    candidates = len,
                    "all candidate URLs marked failed, resetting failure marks"
                );
                self.failed.clear();
                0
            }
        };

        self.activate(chosen);
        tracing::debug!(service = %service, url = %self.candidates[chosen], "selected active URL");
        Some(&self.candidates[chosen])
    }

    /// Records a failure. Returns `true` if the URL was newly marked.
    ///
    /// Unknown URLs are ignored. Re-marking keeps the original timestamp.
    pub(crate) fn mark_failed(&mut self, url: &str) -> bool {
        let Some(index) = self.position(url) else {
            return false;
        };
        if self.active == Some(index) {
            self.active = None;
        }
        if self.failed.contains_key(&index) {
            return false;
        }
        self.failed.insert(index, Instant::now());
        true
    }

    /// Explicitly makes `url` active, clearing any failure mark on it.
    pub(crate) fn set_active(&mut self, url: &str) -> Result<(), HaError> {
        let index =
            self.position(url).ok_or_else(|| HaError::InvalidCandidate { url: url.to_string() })?;
        self.activate(index);
        Ok(())
    }

    fn readmit_expired(&mut self, service: &str) {
        let Some(after) = self.readmit_after else {
            return;
        };
        let before = self.failed.len();
        self.failed.retain(|_, marked_at| marked_at.elapsed() < after);
        let readmitted = before - self.failed.len();
        if readmitted > 0 {
            tracing::debug!(service = %service, readmitted, "re-admitted failed URLs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(urls: &[&str]) -> FailoverState {
        let mut state = FailoverState::new(None);
        state.seed(urls.iter().map(|u| u.to_string()).collect());
        state
    }

    #[test]
    fn test_seed_drops_duplicates_and_keeps_order() {
        let state = seeded(&["http://b", "http://a", "http://b", "http://c"]);
        assert_eq!(state.candidates(), ["http://b", "http://a", "http://c"]);
        assert_eq!(state.current(), None);
    }

    #[test]
    fn test_empty_state_selects_nothing() {
        let mut state = seeded(&[]);
        assert_eq!(state.select("svc"), None);
    }

    #[test]
    fn test_reseed_resets_selection() {
        let mut state = seeded(&["http://a", "http://b"]);
        state.select("svc");
        state.mark_failed("http://a");
        state.seed(vec!["http://c".to_string()]);
        assert_eq!(state.failed_count(), 0);
        assert_eq!(state.select("svc"), Some("http://c"));
    }

    #[test]
    fn test_mark_failed_reports_new_marks_only() {
        let mut state = seeded(&["http://a", "http://b"]);
        assert!(state.mark_failed("http://a"));
        assert!(!state.mark_failed("http://a"));
        assert!(!state.mark_failed("http://elsewhere"));
        assert_eq!(state.failed_count(), 1);
    }

    #[test]
    fn test_failed_urls_are_readmitted_after_timeout() {
        let mut state = FailoverState::new(Some(Duration::from_millis(20)));
        state.seed(vec!["http://a".to_string(), "http://b".to_string()]);

        assert_eq!(state.select("svc"), Some("http://a"));
        state.mark_failed("http://a");
        assert_eq!(state.select("svc"), Some("http://b"));
        assert_eq!(state.failed_count(), 1);

        std::thread::sleep(Duration::from_millis(40));
        // Active URL is stable; the expired mark is simply dropped.
        assert_eq!(state.select("svc"), Some("http://b"));
        assert_eq!(state.failed_count(), 0);
    }
}
