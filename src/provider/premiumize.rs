//! Premiumize client (torrent content only)

use super::{check_response, mime_for_path, DebridClient};
use crate::content_key::{ContentKey, ContentKind};
use crate::error::{DebridError, Result};
use crate::models::{CachedFile, ProviderId};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

const CACHE_CHECK: &str = "/cache/check";
const DIRECT_DL: &str = "/transfer/directdl";

#[derive(Debug, Deserialize)]
struct CacheCheckResponse {
    status: String,
    #[serde(default)]
    response: Vec<bool>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectDlResponse {
    status: String,
    #[serde(default)]
    content: Vec<DirectDlEntry>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectDlEntry {
    path: String,
    size: u64,
    link: String,
}

/// Client for the Premiumize API
pub struct PremiumizeClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PremiumizeClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        PremiumizeClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// An API-level failure reported inside a 200 body is a request fault
    fn api_error(endpoint: &str, message: Option<String>) -> DebridError {
        DebridError::ClientError {
            status: 200,
            endpoint: endpoint.to_string(),
            body: message.unwrap_or_else(|| "status=error".to_string()),
        }
    }

    async fn direct_dl(&self, raw_magnet: &str) -> Result<Vec<DirectDlEntry>> {
        let response = self
            .http
            .post(self.url(DIRECT_DL))
            .query(&[("apikey", self.api_key.as_str())])
            .form(&[("src", raw_magnet)])
            .send()
            .await?;
        let response = check_response(ProviderId::Premiumize, response, DIRECT_DL).await?;
        let body: DirectDlResponse = response.json().await?;

        if body.status != "success" {
            return Err(Self::api_error(DIRECT_DL, body.message));
        }
        Ok(body.content)
    }
}

#[async_trait]
impl DebridClient for PremiumizeClient {
    fn provider(&self) -> ProviderId {
        ProviderId::Premiumize
    }

    fn supports(&self, kind: ContentKind) -> bool {
        kind == ContentKind::Torrent
    }

    async fn is_cached(&self, key: &ContentKey) -> Result<bool> {
        let ContentKey::TorrentMagnet { hash, .. } = key else {
            return Ok(false);
        };

        debug!("Checking premiumize cache: hash={}", hash);
        let response = self
            .http
            .get(self.url(CACHE_CHECK))
            .query(&[("items[]", hash.as_str()), ("apikey", self.api_key.as_str())])
            .send()
            .await?;
        let response = check_response(ProviderId::Premiumize, response, CACHE_CHECK).await?;
        let body: CacheCheckResponse = response.json().await?;

        if body.status != "success" {
            return Err(Self::api_error(CACHE_CHECK, body.message));
        }
        Ok(body.response.first().copied().unwrap_or(false))
    }

    async fn get_cached_files(&self, key: &ContentKey) -> Result<Vec<CachedFile>> {
        let ContentKey::TorrentMagnet { hash, raw_magnet } = key else {
            return Ok(Vec::new());
        };

        let entries = self.direct_dl(raw_magnet).await?;
        let files: Vec<CachedFile> = entries
            .into_iter()
            .map(|entry| {
                let mut file =
                    CachedFile::new(entry.path, entry.size, entry.link, ProviderId::Premiumize);
                file.mime_type = mime_for_path(&file.path).map(str::to_string);
                file
            })
            .collect();

        info!(
            "Premiumize listed cached files: hash={}, files={}",
            hash,
            files.len()
        );
        Ok(files)
    }

    async fn get_streamable_link(
        &self,
        key: &ContentKey,
        file: &CachedFile,
    ) -> Result<Option<String>> {
        let ContentKey::TorrentMagnet { raw_magnet, .. } = key else {
            return Ok(None);
        };

        let entries = self.direct_dl(raw_magnet).await?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.path == file.path)
            .map(|entry| entry.link))
    }
}
