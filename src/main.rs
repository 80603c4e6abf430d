//! Debrid Stream Server
//!
//! Loads configuration, wires providers, state store and streaming, and
//! serves the health endpoint until interrupted.

use anyhow::Context;
use debrid_stream::{
    clients_from_config, CircuitBreaker, ContentKey, ContentService, DebridConfig,
    FileStateStore, HealthCheckService, JsonFileRecordStore, MemoryRecordStore, RateLimiter,
    RecordStore, ResolutionOrchestrator, ResolverMetrics, StalenessPolicy,
    StreamingLinkPreparer,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Main entry point for the debrid stream server
///
/// # Usage
/// ```bash
/// # Start with default config (debrid.yaml)
/// debrid-stream
///
/// # Start with custom config, resolving one magnet or release on startup
/// debrid-stream /path/to/config.yaml "magnet:?xt=urn:btih:..." /movies/Movie
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).cloned().unwrap_or_else(|| "debrid.yaml".to_string());

    let config = DebridConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let level: tracing::Level = config.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting debrid stream server");
    info!("Configuration loaded from: {}", config_path);
    for provider in config.enabled_providers() {
        info!(
            "  - Provider: {} ({}), rate limit {} per {}ms",
            provider.kind,
            provider.base_url_or_default(),
            provider.rate_limit.max_requests,
            provider.rate_limit.window_ms
        );
    }
    info!("  - Retries on provider error: {}", config.retries_on_provider_error);
    info!("  - Circuit breaker cooldown: {}s", config.circuit_breaker_cooldown_secs);

    let metrics = ResolverMetrics::new().context("Failed to register metrics")?;
    let breaker = Arc::new(CircuitBreaker::new());
    let limiter = Arc::new(RateLimiter::new(Default::default()));
    let clients = clients_from_config(&config)?;
    let providers: Vec<_> = clients.iter().map(|c| c.provider()).collect();

    let orchestrator = ResolutionOrchestrator::from_config(
        &config,
        clients,
        breaker.clone(),
        limiter,
        metrics.clone(),
    );

    let backend: Arc<dyn RecordStore> = match &config.state_file {
        Some(path) => {
            info!("  - State file: {}", path);
            Arc::new(JsonFileRecordStore::open(path).await?)
        }
        None => {
            info!("  - State file: none, records are kept in memory");
            Arc::new(MemoryRecordStore::new())
        }
    };
    let store = Arc::new(FileStateStore::new(backend, StalenessPolicy::from_config(&config)));
    let service = ContentService::new(orchestrator, store, StreamingLinkPreparer::from_config(&config)?);

    if let (Some(raw), Some(root)) = (args.get(2), args.get(3)) {
        let key = if raw.starts_with("magnet:") {
            ContentKey::from_magnet(raw.as_str())?
        } else {
            ContentKey::usenet(raw.as_str())?
        };
        match service.add_content(&key, root).await {
            Ok(files) => {
                for file in files {
                    info!(
                        "Created file: path={}, size={}, providers={:?}",
                        file.path, file.size, file.providers
                    );
                }
            }
            Err(e) => error!("Failed to add content: key={}, error={}", key, e),
        }
    }

    if let Some(address) = &config.health_address {
        let addr: SocketAddr = address
            .parse()
            .with_context(|| format!("Invalid health address {}", address))?;
        let health = Arc::new(HealthCheckService::new(breaker, providers, metrics));
        tokio::spawn(async move {
            if let Err(e) = health.start(addr).await {
                error!("Health check server failed: {}", e);
            }
        });
    }

    info!("Server initialization complete");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
