//! Health Check Endpoint
//!
//! Reports provider availability, derived from the circuit breaker, and
//! exposes the resolver's Prometheus metrics.

use crate::circuit_breaker::CircuitBreaker;
use crate::metrics::ResolverMetrics;
use crate::models::ProviderId;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Health status of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every provider is accepting requests
    Healthy,
    /// Some providers are cooling down behind an open circuit
    Degraded,
    /// No provider can currently be asked
    Unhealthy,
}

impl HealthStatus {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody<'a> {
    status: &'a str,
    providers: Vec<&'a str>,
    open_circuits: Vec<String>,
}

/// Health check service
pub struct HealthCheckService {
    breaker: Arc<CircuitBreaker>,
    providers: Vec<ProviderId>,
    metrics: ResolverMetrics,
}

impl HealthCheckService {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        providers: Vec<ProviderId>,
        metrics: ResolverMetrics,
    ) -> Self {
        Self {
            breaker,
            providers,
            metrics,
        }
    }

    /// Circuits currently open for configured providers
    fn open_circuits(&self) -> Vec<String> {
        let names: Vec<&str> = self.providers.iter().map(|p| p.as_str()).collect();
        self.breaker
            .open_circuits()
            .into_iter()
            .filter(|c| names.contains(&c.as_str()))
            .collect()
    }

    pub fn status(&self) -> HealthStatus {
        let open = self.open_circuits().len();
        if self.providers.is_empty() || open == self.providers.len() {
            HealthStatus::Unhealthy
        } else if open > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Start the health check HTTP server
    ///
    /// # Endpoints
    /// - `GET /health` - Provider availability
    /// - `GET /live` - Always healthy while the server runs
    /// - `GET /metrics` - Prometheus text exposition
    pub async fn start(
        self: Arc<Self>,
        addr: impl Into<SocketAddr>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = addr.into();
        let listener = TcpListener::bind(addr).await?;
        info!("Health check server listening on http://{}", addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let service = self.clone();

            tokio::task::spawn(async move {
                let result = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req: Request<hyper::body::Incoming>| {
                            let service = service.clone();
                            async move { service.route(req.method(), req.uri().path()) }
                        }),
                    )
                    .await;

                if let Err(err) = result {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }

    fn route(&self, method: &Method, path: &str) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
        match (method, path) {
            (&Method::GET, "/health") => {
                let status = self.status();
                let body = HealthBody {
                    status: status.as_str(),
                    providers: self.providers.iter().map(|p| p.as_str()).collect(),
                    open_circuits: self.open_circuits(),
                };
                let body = serde_json::to_vec(&body).unwrap_or_default();
                Response::builder()
                    .status(status.to_status_code())
                    .header("Content-Type", "application/json")
                    .body(Full::new(Bytes::from(body)))
            }
            (&Method::GET, "/live") => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(r#"{"status":"healthy"}"#))),
            (&Method::GET, "/metrics") => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(self.metrics.render()))),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(r#"{"error":"not found"}"#))),
        }
    }
}
