//! Shared test doubles for provider and orchestrator tests

#![allow(dead_code)]

use async_trait::async_trait;
use debrid_stream::error::Result;
use debrid_stream::{
    CachedFile, CircuitBreaker, ContentKey, ContentKind, DebridClient, ProviderId,
    RateLimitConfig, RateLimiter, ResolutionOrchestrator, ResolverMetrics, RetryPolicy,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted provider: answers `is_cached` from a queue, then from a fallback
pub struct StubClient {
    provider: ProviderId,
    kind: ContentKind,
    answers: Mutex<VecDeque<Result<bool>>>,
    fallback: Mutex<Result<bool>>,
    files: Mutex<Vec<CachedFile>>,
    link: Mutex<Option<String>>,
    calls: AtomicUsize,
    link_calls: AtomicUsize,
}

impl StubClient {
    pub fn new(provider: ProviderId, kind: ContentKind, fallback: Result<bool>) -> Self {
        StubClient {
            provider,
            kind,
            answers: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            files: Mutex::new(Vec::new()),
            link: Mutex::new(None),
            calls: AtomicUsize::new(0),
            link_calls: AtomicUsize::new(0),
        }
    }

    /// A provider that has `files` cached
    pub fn cached(provider: ProviderId, kind: ContentKind, files: Vec<CachedFile>) -> Self {
        let client = Self::new(provider, kind, Ok(true));
        client.set_files(files);
        client
    }

    pub fn push_answer(&self, answer: Result<bool>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn set_fallback(&self, answer: Result<bool>) {
        *self.fallback.lock().unwrap() = answer;
    }

    pub fn set_files(&self, files: Vec<CachedFile>) {
        *self.files.lock().unwrap() = files;
    }

    pub fn set_link(&self, link: Option<&str>) {
        *self.link.lock().unwrap() = link.map(str::to_string);
    }

    /// Number of `is_cached` calls made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn link_calls(&self) -> usize {
        self.link_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DebridClient for StubClient {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn supports(&self, kind: ContentKind) -> bool {
        kind == self.kind
    }

    async fn is_cached(&self, _key: &ContentKey) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }

    async fn get_cached_files(&self, _key: &ContentKey) -> Result<Vec<CachedFile>> {
        Ok(self.files.lock().unwrap().clone())
    }

    async fn get_streamable_link(
        &self,
        _key: &ContentKey,
        _file: &CachedFile,
    ) -> Result<Option<String>> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.link.lock().unwrap().clone())
    }
}

pub fn magnet() -> ContentKey {
    ContentKey::from_magnet("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567")
        .unwrap()
}

pub fn release() -> ContentKey {
    ContentKey::usenet("Some.Show.S01.1080p").unwrap()
}

pub fn as_clients(stubs: &[Arc<StubClient>]) -> Vec<Arc<dyn DebridClient>> {
    stubs
        .iter()
        .map(|stub| stub.clone() as Arc<dyn DebridClient>)
        .collect()
}

/// Orchestrator over `stubs` with a generous rate limit
pub fn orchestrator(
    stubs: Vec<Arc<StubClient>>,
    max_retries: usize,
    delay: Duration,
) -> ResolutionOrchestrator {
    ResolutionOrchestrator::new(
        as_clients(&stubs),
        Arc::new(CircuitBreaker::new()),
        Arc::new(RateLimiter::new(RateLimitConfig {
            window_ms: 1_000,
            max_requests: 1_000,
        })),
        RetryPolicy::new(max_retries, delay),
        ResolverMetrics::new().unwrap(),
    )
}
