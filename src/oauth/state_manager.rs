//! OAuth state management for CSRF protection.
//!
//! Manages temporary state tokens used to tie a callback to the connect
//! request that started it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// OAuth state entry
#[derive(Clone, Debug)]
pub struct StateEntry {
    /// Callback URL sent with the authorize redirect
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

/// OAuth state manager with automatic expiration
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// # Arguments
    /// * `expiry_seconds` - How long states remain valid (default: 600 = 10 minutes)
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, StateEntry>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Generate a new state token and store it
    ///
    /// Returns the state token (UUID v4)
    pub fn create_state(&self, redirect_uri: &str) -> String {
        let state = Uuid::new_v4().to_string();
        let entry = StateEntry {
            redirect_uri: redirect_uri.to_string(),
            created_at: Utc::now(),
        };

        self.states().insert(state.clone(), entry);

        state
    }

    /// Validate and consume a state token
    ///
    /// Returns the StateEntry if valid and not expired, None otherwise.
    /// The state is removed from the map (single-use).
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let entry = self.states().remove(state)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    /// Clean up expired states (should be called periodically)
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expiry = self.expiry_duration;

        self.states()
            .retain(|_, entry| now - entry.created_at <= expiry);
    }

    /// Get count of active states
    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!("OAuth state cleanup complete, {} states remaining", manager.count());
    }
}
