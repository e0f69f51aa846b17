// Anti-CSRF state tokens for the connect/callback round trip

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Outstanding `state` values handed to the authorization endpoint.
/// Each value is single-use and expires after a fixed window.
#[derive(Clone)]
pub struct PendingStates {
    states: Arc<DashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl PendingStates {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Issue a fresh state value
    pub fn issue(&self) -> String {
        self.purge_expired();

        let state = Uuid::new_v4().simple().to_string();
        self.states.insert(state.clone(), Utc::now());
        state
    }

    /// Validate and consume a state value
    pub fn consume(&self, state: &str) -> bool {
        match self.states.remove(state) {
            Some((_, issued_at)) => Utc::now() - issued_at <= self.ttl,
            None => false,
        }
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.states.retain(|_, issued_at| now - *issued_at <= self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_consume() {
        let states = PendingStates::new(600);
        let state = states.issue();
        assert_eq!(state.len(), 32);
        assert!(states.consume(&state));
    }

    #[test]
    fn test_state_is_single_use() {
        let states = PendingStates::new(600);
        let state = states.issue();
        assert!(states.consume(&state));
        assert!(!states.consume(&state));
        assert!(states.states.is_empty());
    }

    #[test]
    fn test_unknown_state_rejected() {
        let states = PendingStates::new(600);
        assert!(!states.consume("forged"));
    }

    #[test]
    fn test_expired_state_rejected_and_purged() {
        let states = PendingStates::new(-1);
        let state = states.issue();
        assert!(!states.consume(&state));

        states.issue();
        states.issue();
        // Issuing purges anything past the window
        assert_eq!(states.states.len(), 1);
    }
}
