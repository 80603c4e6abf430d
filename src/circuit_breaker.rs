//! Per-provider circuit breaker
//!
//! A breaker is an expiry timestamp keyed by provider name. While the
//! timestamp is in the future the provider is skipped. The first check past
//! expiry removes the entry, so a breaker is never silently renewed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Process-wide set of open circuits, shared by the orchestrator and the
/// health endpoint
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    open_until: Mutex<HashMap<String, Instant>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // The map holds plain timestamps, a panic mid-update cannot corrupt it
        self.open_until.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the breaker for `name` for `duration`
    ///
    /// Re-opening an open breaker replaces its expiry.
    pub fn open(&self, name: &str, duration: Duration) {
        let until = Instant::now() + duration;
        self.circuits().insert(name.to_string(), until);
        info!("Circuit opened: provider={}, duration={:?}", name, duration);
    }

    /// Check whether the breaker for `name` is open
    ///
    /// A breaker found past its expiry is cleared and reported closed.
    pub fn is_open(&self, name: &str) -> bool {
        let mut circuits = self.circuits();
        match circuits.get(name) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                circuits.remove(name);
                debug!("Circuit closed after expiry: provider={}", name);
                false
            }
            None => false,
        }
    }

    /// Names of providers whose breaker is currently open
    ///
    /// Unlike [`is_open`](Self::is_open) this never clears expired entries.
    pub fn open_circuits(&self) -> Vec<String> {
        let now = Instant::now();
        let mut names: Vec<String> = self
            .circuits()
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
