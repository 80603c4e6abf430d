//! Prometheus metrics for provider resolution and link serving

use crate::models::{ProviderId, ProviderOutcome};
use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Metrics collector for resolution, breaker, limiter and link refresh events
///
/// Counters live on a private registry so several instances (one per test,
/// for example) never collide.
#[derive(Clone)]
pub struct ResolverMetrics {
    registry: Registry,
    outcomes_total: CounterVec,
    retries_total: CounterVec,
    breaker_skips_total: CounterVec,
    breaker_opens_total: CounterVec,
    rate_limit_waits_total: CounterVec,
    link_refreshes_total: CounterVec,
    dead_links_total: CounterVec,
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, prometheus::Error> {
    let counter = CounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl ResolverMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let outcomes_total = counter(
            &registry,
            "debrid_provider_outcomes_total",
            "Provider resolution outcomes",
            &["provider", "outcome"],
        )?;
        let retries_total = counter(
            &registry,
            "debrid_provider_retries_total",
            "Retried provider calls",
            &["provider"],
        )?;
        let breaker_skips_total = counter(
            &registry,
            "debrid_circuit_breaker_skips_total",
            "Resolutions skipped because the provider circuit was open",
            &["provider"],
        )?;
        let breaker_opens_total = counter(
            &registry,
            "debrid_circuit_breaker_opens_total",
            "Times a provider circuit was opened",
            &["provider"],
        )?;
        let rate_limit_waits_total = counter(
            &registry,
            "debrid_rate_limit_waits_total",
            "Provider calls held back by the rate limiter",
            &["provider"],
        )?;
        let link_refreshes_total = counter(
            &registry,
            "debrid_link_refreshes_total",
            "Links re-resolved after being found dead",
            &["provider", "result"],
        )?;
        let dead_links_total = counter(
            &registry,
            "debrid_dead_links_total",
            "Links found dead before or during streaming",
            &["provider"],
        )?;

        Ok(Self {
            registry,
            outcomes_total,
            retries_total,
            breaker_skips_total,
            breaker_opens_total,
            rate_limit_waits_total,
            link_refreshes_total,
            dead_links_total,
        })
    }

    pub fn record_outcome(&self, provider: ProviderId, outcome: &ProviderOutcome) {
        self.outcomes_total
            .with_label_values(&[provider.as_str(), outcome.label()])
            .inc();
    }

    pub fn record_retry(&self, provider: ProviderId) {
        self.retries_total.with_label_values(&[provider.as_str()]).inc();
    }

    pub fn record_breaker_skip(&self, provider: ProviderId) {
        self.breaker_skips_total
            .with_label_values(&[provider.as_str()])
            .inc();
    }

    pub fn record_breaker_open(&self, provider: ProviderId) {
        self.breaker_opens_total
            .with_label_values(&[provider.as_str()])
            .inc();
    }

    pub fn record_rate_limit_wait(&self, provider: ProviderId) {
        self.rate_limit_waits_total
            .with_label_values(&[provider.as_str()])
            .inc();
    }

    pub fn record_link_refresh(&self, provider: ProviderId, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.link_refreshes_total
            .with_label_values(&[provider.as_str(), result])
            .inc();
    }

    pub fn record_dead_link(&self, provider: ProviderId) {
        self.dead_links_total
            .with_label_values(&[provider.as_str()])
            .inc();
    }

    /// Current value of the outcome counter for a provider and outcome label
    pub fn outcome_count(&self, provider: ProviderId, outcome: &str) -> u64 {
        self.outcomes_total
            .with_label_values(&[provider.as_str(), outcome])
            .get() as u64
    }

    pub fn retry_count(&self, provider: ProviderId) -> u64 {
        self.retries_total
            .with_label_values(&[provider.as_str()])
            .get() as u64
    }

    pub fn breaker_skip_count(&self, provider: ProviderId) -> u64 {
        self.breaker_skips_total
            .with_label_values(&[provider.as_str()])
            .get() as u64
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
