//! Sliding-window rate limiter keyed by provider name

use crate::config::RateLimitConfig;
use crate::error::{DebridError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Admission window for one provider
#[derive(Debug)]
struct Window {
    limit: RateLimitConfig,
    calls: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        let window = self.limit.window();
        while let Some(oldest) = self.calls.front() {
            if *oldest + window <= now {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-provider admission control
///
/// Each provider's "prune, maybe wait, record" sequence runs under that
/// provider's async lock, so concurrent callers cannot jointly overshoot the
/// quota. Waiting suspends the task; no worker thread is blocked.
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: RateLimitConfig,
    windows: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Window>>>>,
}

impl RateLimiter {
    /// Create a limiter applying `default_limit` to providers not configured
    /// explicitly
    pub fn new(default_limit: RateLimitConfig) -> Self {
        RateLimiter {
            default_limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Set the limit for one provider, resetting its window
    pub fn configure(&self, name: &str, limit: RateLimitConfig) {
        let window = Window {
            limit,
            calls: VecDeque::new(),
        };
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Arc::new(tokio::sync::Mutex::new(window)));
    }

    fn window_for(&self, name: &str) -> Arc<tokio::sync::Mutex<Window>> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(Window {
                    limit: self.default_limit,
                    calls: VecDeque::new(),
                }))
            })
            .clone()
    }

    /// Wait until a call to `name` is admitted and record it
    ///
    /// Returns how long the caller was held back. Fails only when the
    /// provider's quota can never admit a call.
    pub async fn acquire(&self, name: &str) -> Result<Duration> {
        let slot = self.window_for(name);
        let mut window = slot.lock().await;

        if window.limit.max_requests == 0 {
            return Err(DebridError::InternalError(format!(
                "rate limiter for {} has a zero quota and can never admit a call",
                name
            )));
        }

        let started = Instant::now();
        loop {
            let now = Instant::now();
            window.prune(now);

            if window.calls.len() < window.limit.max_requests {
                window.calls.push_back(now);
                return Ok(now - started);
            }

            // Non-empty: len >= max_requests >= 1
            let Some(oldest) = window.calls.front().copied() else {
                continue;
            };
            let ready_at = oldest + window.limit.window();
            debug!(
                "Rate limit reached: provider={}, in_window={}, wait={:?}",
                name,
                window.calls.len(),
                ready_at - now
            );
            sleep_until(ready_at).await;
        }
    }

    /// Calls currently counted in the provider's window
    pub async fn in_window(&self, name: &str) -> usize {
        let slot = self.window_for(name);
        let mut window = slot.lock().await;
        window.prune(Instant::now());
        window.calls.len()
    }
}
