//! Fan-out of content resolution across debrid providers

use crate::circuit_breaker::CircuitBreaker;
use crate::config::DebridConfig;
use crate::content_key::ContentKey;
use crate::error::{DebridError, Result};
use crate::metrics::ResolverMetrics;
use crate::models::{CachedFile, ProviderId, ProviderOutcome, ProviderResolution};
use crate::provider::DebridClient;
use crate::rate_limiter::RateLimiter;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy for failed provider calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,
    /// Fixed delay between consecutive attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        RetryPolicy { max_retries, delay }
    }

    /// Check if we should retry based on the attempt number and error
    pub fn should_retry(&self, attempt: usize, error: &DebridError) -> bool {
        attempt < self.max_retries && error.should_retry()
    }

    /// Get the backoff duration before the retry following `attempt`
    pub fn backoff_duration(&self, _attempt: usize) -> Duration {
        self.delay
    }
}

/// Resolves content keys against every configured provider
///
/// Per provider the call path is: circuit breaker check, rate limiter
/// admission, provider call, error classification, retry loop. Provider
/// failures are folded into [`ProviderOutcome`]s; only fatal errors (store,
/// limiter, internal) are returned as `Err`.
#[derive(Clone)]
pub struct ResolutionOrchestrator {
    clients: Vec<Arc<dyn DebridClient>>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    breaker_cooldown: Duration,
    metrics: ResolverMetrics,
}

impl ResolutionOrchestrator {
    pub fn new(
        clients: Vec<Arc<dyn DebridClient>>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        metrics: ResolverMetrics,
    ) -> Self {
        ResolutionOrchestrator {
            clients,
            breaker,
            limiter,
            retry_policy,
            breaker_cooldown: Duration::from_secs(60),
            metrics,
        }
    }

    /// Build an orchestrator whose retry, breaker and rate limits follow
    /// `config`
    pub fn from_config(
        config: &DebridConfig,
        clients: Vec<Arc<dyn DebridClient>>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        metrics: ResolverMetrics,
    ) -> Self {
        for provider in config.enabled_providers() {
            limiter.configure(provider.kind.as_str(), provider.rate_limit);
        }
        let retry_policy = RetryPolicy::new(
            config.retries_on_provider_error,
            config.delay_between_retries(),
        );
        Self::new(clients, breaker, limiter, retry_policy, metrics)
            .with_breaker_cooldown(config.circuit_breaker_cooldown())
    }

    /// How long a provider is skipped after exhausting retries or being rate
    /// limited upstream
    pub fn with_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.breaker_cooldown = cooldown;
        self
    }

    pub fn metrics(&self) -> &ResolverMetrics {
        &self.metrics
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Providers able to serve this key, in configuration order
    pub fn providers_for(&self, key: &ContentKey) -> Vec<ProviderId> {
        self.clients
            .iter()
            .filter(|c| c.supports(key.kind()))
            .map(|c| c.provider())
            .collect()
    }

    /// Resolve `key` against every applicable provider concurrently
    ///
    /// Returns exactly one outcome per applicable provider, in configuration
    /// order. Dropping the returned future aborts all in-flight provider
    /// calls.
    pub async fn resolve(&self, key: &ContentKey) -> Result<Vec<ProviderResolution>> {
        let mut tasks = JoinSet::new();
        for (index, client) in self
            .clients
            .iter()
            .filter(|c| c.supports(key.kind()))
            .enumerate()
        {
            let this = self.clone();
            let client = client.clone();
            let key = key.clone();
            tasks.spawn(async move {
                let outcome = this.resolve_with(client.as_ref(), &key).await;
                (index, client.provider(), outcome)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, provider, outcome) = joined
                .map_err(|e| DebridError::InternalError(format!("Task join error: {}", e)))?;
            results.push((index, ProviderResolution {
                provider,
                outcome: outcome?,
            }));
        }
        results.sort_by_key(|(index, _)| *index);

        let results: Vec<ProviderResolution> = results.into_iter().map(|(_, r)| r).collect();
        info!(
            "Resolved content: key={}, providers={}, cached={}",
            key,
            results.len(),
            results.iter().filter(|r| r.outcome.is_cached()).count()
        );
        Ok(results)
    }

    /// Resolve `key` against a single provider
    ///
    /// A provider that is not configured, or cannot serve the key's variant,
    /// yields `NotCached`.
    pub async fn resolve_provider(
        &self,
        key: &ContentKey,
        provider: ProviderId,
    ) -> Result<ProviderOutcome> {
        let client = self
            .clients
            .iter()
            .find(|c| c.provider() == provider && c.supports(key.kind()));
        match client {
            Some(client) => self.resolve_with(client.as_ref(), key).await,
            None => {
                warn!(
                    "No enabled client for provider: provider={}, key={}",
                    provider, key
                );
                Ok(ProviderOutcome::NotCached)
            }
        }
    }

    /// Union of the cached files of every successful provider outcome
    pub async fn cached_files(&self, key: &ContentKey) -> Result<Vec<CachedFile>> {
        let resolutions = self.resolve(key).await?;
        Ok(Self::cached_files_from(&resolutions))
    }

    /// Union of the cached files in already computed outcomes
    pub fn cached_files_from(resolutions: &[ProviderResolution]) -> Vec<CachedFile> {
        let mut seen = HashSet::new();
        resolutions
            .iter()
            .flat_map(|r| r.outcome.files())
            .filter(|file| seen.insert((*file).clone()))
            .cloned()
            .collect()
    }

    /// Re-resolve one file's link from its own provider
    ///
    /// Goes through the same breaker, limiter and retry path as a
    /// resolution. A fresh link comes back as `Cached` with that single
    /// file; a provider that no longer serves the file yields `NotCached`.
    pub async fn refresh_file(
        &self,
        key: &ContentKey,
        file: &CachedFile,
    ) -> Result<ProviderOutcome> {
        let Some(client) = self
            .clients
            .iter()
            .find(|c| c.provider() == file.provider && c.supports(key.kind()))
        else {
            return Ok(ProviderOutcome::NotCached);
        };
        let client = client.as_ref();

        self.call_with_policy(client.provider(), key, move || async move {
            self.admit(file.provider).await?;
            let outcome = match client.get_streamable_link(key, file).await? {
                Some(link) => {
                    let mut fresh = file.clone();
                    fresh.link = link;
                    fresh.last_checked = SystemTime::now();
                    ProviderOutcome::Cached { files: vec![fresh] }
                }
                None => ProviderOutcome::NotCached,
            };
            Ok(outcome)
        })
        .await
    }

    async fn admit(&self, provider: ProviderId) -> Result<()> {
        let waited = self.limiter.acquire(provider.as_str()).await?;
        if !waited.is_zero() {
            self.metrics.record_rate_limit_wait(provider);
        }
        Ok(())
    }

    /// One attempt: "is cached", then "list files", each admitted separately
    async fn attempt(&self, client: &dyn DebridClient, key: &ContentKey) -> Result<ProviderOutcome> {
        let provider = client.provider();

        self.admit(provider).await?;
        if !client.is_cached(key).await? {
            return Ok(ProviderOutcome::NotCached);
        }

        self.admit(provider).await?;
        let files = client.get_cached_files(key).await?;
        if files.is_empty() {
            debug!(
                "Provider reported cached but listed no files: provider={}, key={}",
                provider, key
            );
            return Ok(ProviderOutcome::NotCached);
        }
        Ok(ProviderOutcome::Cached { files })
    }

    /// Open the breaker for providers that are overloaded or keep failing
    fn trip_if_failing(&self, provider: ProviderId, error: &DebridError) {
        if error.is_rate_limited() || error.should_retry() {
            self.breaker.open(provider.as_str(), self.breaker_cooldown);
            self.metrics.record_breaker_open(provider);
        }
    }

    async fn resolve_with(
        &self,
        client: &dyn DebridClient,
        key: &ContentKey,
    ) -> Result<ProviderOutcome> {
        self.call_with_policy(client.provider(), key, move || self.attempt(client, key))
            .await
    }

    /// Run `call` behind the provider's breaker with the retry policy,
    /// folding provider failures into an outcome
    async fn call_with_policy<F, Fut>(
        &self,
        provider: ProviderId,
        key: &ContentKey,
        mut call: F,
    ) -> Result<ProviderOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ProviderOutcome>>,
    {
        if self.breaker.is_open(provider.as_str()) {
            debug!("Circuit open, skipping: provider={}, key={}", provider, key);
            self.metrics.record_breaker_skip(provider);
            let outcome = ProviderOutcome::NotCached;
            self.metrics.record_outcome(provider, &outcome);
            return Ok(outcome);
        }

        let mut attempt = 0;
        loop {
            match call().await {
                Ok(outcome) => {
                    debug!(
                        "Provider answered: provider={}, key={}, outcome={}",
                        provider,
                        key,
                        outcome.label()
                    );
                    self.metrics.record_outcome(provider, &outcome);
                    return Ok(outcome);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if self.retry_policy.should_retry(attempt, &e) {
                        let backoff = self.retry_policy.backoff_duration(attempt);
                        warn!(
                            "Provider call failed: provider={}, key={}, attempt={}, retrying after {:?}: {}",
                            provider,
                            key,
                            attempt + 1,
                            backoff,
                            e
                        );
                        self.metrics.record_retry(provider);
                        sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }

                    if matches!(e, DebridError::UnknownError { .. }) {
                        warn!(
                            "Provider returned unexpected status: provider={}, key={}, error={}",
                            provider, key, e
                        );
                    }
                    self.trip_if_failing(provider, &e);

                    let outcome = ProviderOutcome::from_error(&e);
                    warn!(
                        "Provider call gave up: provider={}, key={}, attempts={}, outcome={}, error={}",
                        provider,
                        key,
                        attempt + 1,
                        outcome.label(),
                        e
                    );
                    self.metrics.record_outcome(provider, &outcome);
                    return Ok(outcome);
                }
            }
        }
    }
}
