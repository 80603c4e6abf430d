//! Debrid Stream
//!
//! Resolves torrent and usenet content against debrid providers, remembers
//! per file which provider can serve it, and streams provider links with
//! byte-range support.
//!
//! # Overview
//!
//! Content is identified by a [`ContentKey`]: a torrent info hash or a usenet
//! release name. Adding content asks every configured provider concurrently
//! whether it has the content cached; each remote file any provider has
//! becomes a virtual file. Every virtual file keeps one
//! [`FileProviderRecord`] per provider, recording whether that provider had
//! it, failed, or was unreachable, and when that was checked. Failed
//! records are re-asked only after a configurable wait, so a provider that
//! just returned 5xx is not hammered on every read.
//!
//! # Architecture
//!
//! - [`DebridClient`]: provider API clients (Premiumize, Easynews)
//! - [`ResolutionOrchestrator`]: fan-out with circuit breaker, rate limiter
//!   and retries
//! - [`FileStateStore`]: per-file provider records with staleness
//! - [`StreamingLinkPreparer`]: ranged upstream requests and link probing
//! - [`ContentService`]: adding content and serving virtual files
//! - [`HealthCheckService`]: health and Prometheus metrics endpoint
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use debrid_stream::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<()> {
//! let config = DebridConfig::from_file("debrid.yaml")?;
//! let metrics = ResolverMetrics::new().map_err(|e| DebridError::InternalError(e.to_string()))?;
//! let orchestrator = ResolutionOrchestrator::from_config(
//!     &config,
//!     clients_from_config(&config)?,
//!     Arc::new(CircuitBreaker::new()),
//!     Arc::new(RateLimiter::new(RateLimitConfig::default())),
//!     metrics,
//! );
//! let store = Arc::new(FileStateStore::new(
//!     Arc::new(MemoryRecordStore::new()),
//!     StalenessPolicy::from_config(&config),
//! ));
//! let service = ContentService::new(orchestrator, store, StreamingLinkPreparer::from_config(&config)?);
//!
//! let key = ContentKey::usenet("Some.Movie.2023.1080p")?;
//! for file in service.add_content(&key, "/movies/Some Movie").await? {
//!     let mut stream = service.open_stream(&file.path, &key, None).await?;
//!     while let Some(chunk) = stream.next_chunk().await? {
//!         println!("{} bytes", chunk.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod content_key;
pub mod error;
pub mod health_check;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod rate_limiter;
pub mod service;
pub mod store;
pub mod streaming;

// Re-export commonly used types
pub use circuit_breaker::CircuitBreaker;
pub use config::{DebridConfig, ProviderConfig, RateLimitConfig};
pub use content_key::{ContentKey, ContentKind};
pub use error::{DebridError, Result};
pub use health_check::{HealthCheckService, HealthStatus};
pub use metrics::ResolverMetrics;
pub use models::{
    ByteRange, CachedFile, FileOutcome, FileProviderRecord, FileState, ProviderId,
    ProviderOutcome, ProviderResolution, RangeRequest,
};
pub use orchestrator::{ResolutionOrchestrator, RetryPolicy};
pub use provider::{clients_from_config, DebridClient, EasynewsClient, PremiumizeClient};
pub use rate_limiter::RateLimiter;
pub use service::{ContentService, VirtualFile};
pub use store::{
    FileStateStore, JsonFileRecordStore, MemoryRecordStore, RecordStore, StalenessPolicy,
};
pub use streaming::{LinkRefresher, LinkStream, PreparedRequest, StreamingLinkPreparer};
