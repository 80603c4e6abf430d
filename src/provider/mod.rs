//! Debrid provider clients
//!
//! Every client answers the same three questions about a [`ContentKey`]:
//! is it cached, which files does it have, and what is a streamable link for
//! one of those files. A client only serves the key variants its transport
//! understands and answers the others with an empty result without touching
//! the network.

mod easynews;
mod premiumize;

pub use easynews::EasynewsClient;
pub use premiumize::PremiumizeClient;

use crate::config::{DebridConfig, ProviderConfig};
use crate::content_key::{ContentKey, ContentKind};
use crate::error::{DebridError, Result};
use crate::models::{CachedFile, ProviderId};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Longest response body kept in error diagnostics
const MAX_ERROR_BODY: usize = 512;

/// Capability set shared by all debrid providers
#[async_trait]
pub trait DebridClient: Send + Sync {
    /// Which provider this client talks to
    fn provider(&self) -> ProviderId;

    /// Whether this client can serve keys of the given kind
    fn supports(&self, kind: ContentKind) -> bool;

    /// Ask the provider whether the content is cached
    async fn is_cached(&self, key: &ContentKey) -> Result<bool>;

    /// List the cached files of the content, with fresh links
    async fn get_cached_files(&self, key: &ContentKey) -> Result<Vec<CachedFile>>;

    /// Obtain a fresh streamable link for one previously listed file
    ///
    /// Returns `Ok(None)` when the provider no longer has the file.
    async fn get_streamable_link(
        &self,
        key: &ContentKey,
        file: &CachedFile,
    ) -> Result<Option<String>>;
}

/// Build an HTTP client for provider API calls
pub fn build_api_client(connect_timeout: Duration, request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| DebridError::InternalError(format!("Failed to create HTTP client: {}", e)))
}

/// Build one client per enabled provider in the configuration
pub fn clients_from_config(config: &DebridConfig) -> Result<Vec<Arc<dyn DebridClient>>> {
    let http = build_api_client(config.connect_timeout(), config.read_timeout())?;

    Ok(config
        .providers
        .iter()
        .filter(|p| p.enabled)
        .map(|p| client_for(p, http.clone()))
        .collect())
}

fn client_for(provider: &ProviderConfig, http: Client) -> Arc<dyn DebridClient> {
    match provider.kind {
        ProviderId::Premiumize => Arc::new(PremiumizeClient::new(
            http,
            provider.base_url_or_default(),
            provider.api_key.clone().unwrap_or_default(),
        )),
        ProviderId::Easynews => Arc::new(EasynewsClient::new(
            http,
            provider.base_url_or_default(),
            provider.username.clone().unwrap_or_default(),
            provider.password.clone().unwrap_or_default(),
        )),
    }
}

/// Turn a non-2xx response into a classified error carrying status,
/// endpoint and (truncated) body
pub(crate) async fn check_response(
    provider: ProviderId,
    response: Response,
    endpoint: &str,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    warn!(
        "Provider returned error: provider={}, endpoint={}, status={}",
        provider, endpoint, status
    );
    Err(DebridError::from_http_status(status.as_u16(), endpoint, body))
}

/// Best-effort MIME type for a media file name
pub(crate) fn mime_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mkv" => "video/x-matroska",
        "mp4" | "m4v" => "video/mp4",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "srt" => "application/x-subrip",
        "nfo" | "txt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => return None,
    };
    Some(mime)
}
