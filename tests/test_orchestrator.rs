//! Integration tests for ResolutionOrchestrator

mod common;

use common::{as_clients, magnet, orchestrator, release, StubClient};
use debrid_stream::error::DebridError;
use debrid_stream::{
    CachedFile, CircuitBreaker, ContentKind, ProviderId, ProviderOutcome,
    RateLimitConfig, RateLimiter, ResolutionOrchestrator, ResolverMetrics, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn unavailable() -> DebridError {
    DebridError::from_http_status(503, "/cache/check", "down")
}

fn movie(provider: ProviderId) -> CachedFile {
    CachedFile::new("movie.mkv", 2000, format!("https://{}/movie", provider), provider)
}

#[tokio::test]
async fn test_one_outcome_per_compatible_provider() {
    let premiumize = Arc::new(StubClient::cached(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        vec![movie(ProviderId::Premiumize)],
    ));
    let easynews = Arc::new(StubClient::new(ProviderId::Easynews, ContentKind::Usenet, Ok(true)));
    let orchestrator = orchestrator(
        vec![premiumize.clone(), easynews.clone()],
        2,
        Duration::from_millis(10),
    );

    let resolutions = orchestrator.resolve(&magnet()).await.unwrap();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].provider, ProviderId::Premiumize);
    assert!(resolutions[0].outcome.is_cached());
    assert_eq!(easynews.calls(), 0);

    let resolutions = orchestrator.resolve(&release()).await.unwrap();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].provider, ProviderId::Easynews);
    // Cached but no files listed
    assert_eq!(resolutions[0].outcome, ProviderOutcome::NotCached);
}

#[tokio::test]
async fn test_outcomes_follow_configuration_order() {
    let first = Arc::new(StubClient::cached(
        ProviderId::Easynews,
        ContentKind::Torrent,
        vec![movie(ProviderId::Easynews)],
    ));
    let second = Arc::new(StubClient::new(ProviderId::Premiumize, ContentKind::Torrent, Ok(false)));
    let orchestrator = orchestrator(vec![first, second], 0, Duration::ZERO);

    let resolutions = orchestrator.resolve(&magnet()).await.unwrap();
    let providers: Vec<ProviderId> = resolutions.iter().map(|r| r.provider).collect();
    assert_eq!(providers, vec![ProviderId::Easynews, ProviderId::Premiumize]);
    assert_eq!(resolutions[1].outcome, ProviderOutcome::NotCached);
}

#[tokio::test(start_paused = true)]
async fn test_provider_error_retried_then_breaker_opens() {
    let client = Arc::new(StubClient::new(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        Err(unavailable()),
    ));
    let orchestrator = orchestrator(vec![client.clone()], 2, Duration::from_millis(500))
        .with_breaker_cooldown(Duration::from_secs(60));

    let started = Instant::now();
    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::ProviderError);
    assert_eq!(client.calls(), 3);
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(orchestrator.metrics().retry_count(ProviderId::Premiumize), 2);

    // Skipped while the circuit is open
    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::NotCached);
    assert_eq!(client.calls(), 3);
    assert_eq!(orchestrator.metrics().breaker_skip_count(ProviderId::Premiumize), 1);
    assert_eq!(orchestrator.breaker().open_circuits(), vec!["premiumize"]);

    // Asked again once the cooldown passed
    tokio::time::advance(Duration::from_secs(61)).await;
    client.set_fallback(Ok(false));
    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::NotCached);
    assert_eq!(client.calls(), 4);
    assert!(orchestrator.breaker().open_circuits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recovers_within_retry_budget() {
    let client = Arc::new(StubClient::cached(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        vec![movie(ProviderId::Premiumize)],
    ));
    client.push_answer(Err(unavailable()));
    let orchestrator = orchestrator(vec![client.clone()], 2, Duration::from_millis(500));

    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert!(outcome.is_cached());
    assert_eq!(client.calls(), 2);
    assert!(orchestrator.breaker().open_circuits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_body_is_retried_like_provider_error() {
    let client = Arc::new(StubClient::cached(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        vec![movie(ProviderId::Premiumize)],
    ));
    client.push_answer(Err(DebridError::ParseError("expected value at line 1".to_string())));
    let orchestrator = orchestrator(vec![client.clone()], 2, Duration::from_millis(500));

    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert!(outcome.is_cached());
    assert_eq!(client.calls(), 2);
    assert_eq!(orchestrator.metrics().retry_count(ProviderId::Premiumize), 1);

    // Still malformed after the budget: recorded as a provider error
    client.set_fallback(Err(DebridError::ParseError("<html>".to_string())));
    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::ProviderError);
    assert_eq!(client.calls(), 5);
}

#[tokio::test]
async fn test_client_and_network_errors_are_not_retried() {
    let client = Arc::new(StubClient::new(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        Err(DebridError::from_http_status(404, "/cache/check", "")),
    ));
    let orchestrator = orchestrator(vec![client.clone()], 3, Duration::from_millis(10));

    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::ClientError);
    assert_eq!(client.calls(), 1);

    client.set_fallback(Err(DebridError::NetworkError("connection reset".to_string())));
    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::NetworkError);
    assert_eq!(client.calls(), 2);
    assert!(orchestrator.breaker().open_circuits().is_empty());
}

#[tokio::test]
async fn test_rate_limited_provider_opens_breaker_without_retry() {
    let client = Arc::new(StubClient::new(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        Err(DebridError::from_http_status(429, "/cache/check", "slow down")),
    ));
    let orchestrator = orchestrator(vec![client.clone()], 3, Duration::from_millis(10));

    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Premiumize)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::ClientError);
    assert_eq!(client.calls(), 1);
    assert_eq!(orchestrator.breaker().open_circuits(), vec!["premiumize"]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_spaces_provider_calls() {
    let client = Arc::new(StubClient::cached(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        vec![movie(ProviderId::Premiumize)],
    ));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        window_ms: 1_000,
        max_requests: 1,
    }));
    let clients = as_clients(&[client]);
    let orchestrator = ResolutionOrchestrator::new(
        clients,
        Arc::new(CircuitBreaker::new()),
        limiter,
        RetryPolicy::new(0, Duration::ZERO),
        ResolverMetrics::new().unwrap(),
    );

    // "is cached" and "list files" are admitted separately
    let started = Instant::now();
    let resolutions = orchestrator.resolve(&magnet()).await.unwrap();
    assert!(resolutions[0].outcome.is_cached());
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_zero_quota_is_fatal() {
    let client = Arc::new(StubClient::new(ProviderId::Premiumize, ContentKind::Torrent, Ok(true)));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        window_ms: 1_000,
        max_requests: 0,
    }));
    let clients = as_clients(&[client.clone()]);
    let orchestrator = ResolutionOrchestrator::new(
        clients,
        Arc::new(CircuitBreaker::new()),
        limiter,
        RetryPolicy::new(2, Duration::ZERO),
        ResolverMetrics::new().unwrap(),
    );

    let result = orchestrator.resolve(&magnet()).await;
    assert!(matches!(result, Err(DebridError::InternalError(_))));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_cached_files_union_across_providers() {
    let premiumize = Arc::new(StubClient::cached(
        ProviderId::Premiumize,
        ContentKind::Torrent,
        vec![movie(ProviderId::Premiumize)],
    ));
    let easynews = Arc::new(StubClient::cached(
        ProviderId::Easynews,
        ContentKind::Torrent,
        vec![movie(ProviderId::Easynews)],
    ));
    let failing = Arc::new(StubClient::new(
        ProviderId::Premiumize,
        ContentKind::Usenet,
        Err(unavailable()),
    ));
    let orchestrator = orchestrator(vec![premiumize, easynews, failing], 0, Duration::ZERO);

    let files = orchestrator.cached_files(&magnet()).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].provider, ProviderId::Premiumize);
    assert_eq!(files[1].provider, ProviderId::Easynews);
}

#[tokio::test]
async fn test_refresh_file_returns_fresh_link() {
    let client = Arc::new(StubClient::new(ProviderId::Premiumize, ContentKind::Torrent, Ok(true)));
    client.set_link(Some("https://premiumize/fresh"));
    let orchestrator = orchestrator(vec![client.clone()], 0, Duration::ZERO);

    let dead = movie(ProviderId::Premiumize);
    let outcome = orchestrator.refresh_file(&magnet(), &dead).await.unwrap();
    let files = outcome.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0], dead);
    assert_eq!(files[0].link, "https://premiumize/fresh");
    assert_eq!(client.link_calls(), 1);

    client.set_link(None);
    let outcome = orchestrator.refresh_file(&magnet(), &dead).await.unwrap();
    assert_eq!(outcome, ProviderOutcome::NotCached);
}

#[tokio::test]
async fn test_unconfigured_provider_is_not_cached() {
    let client = Arc::new(StubClient::new(ProviderId::Premiumize, ContentKind::Torrent, Ok(true)));
    let orchestrator = orchestrator(vec![client.clone()], 0, Duration::ZERO);

    let outcome = orchestrator
        .resolve_provider(&magnet(), ProviderId::Easynews)
        .await
        .unwrap();
    assert_eq!(outcome, ProviderOutcome::NotCached);
    assert_eq!(client.calls(), 0);
}
