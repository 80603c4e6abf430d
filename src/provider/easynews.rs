//! Easynews client (usenet content only)

use super::{check_response, mime_for_path, DebridClient};
use crate::content_key::{ContentKey, ContentKind};
use crate::error::{DebridError, Result};
use crate::models::{CachedFile, ProviderId};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, info};

const SEARCH: &str = "/2.0/search/solr-search/";

const PARAM_HASH: &str = "hash";
const PARAM_EXT: &str = "ext";
const PARAM_FILENAME: &str = "filename";
const PARAM_FARM: &str = "farm";
const PARAM_PORT: &str = "port";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchRow>,
    #[serde(rename = "dlFarm", default)]
    dl_farm: Option<String>,
    #[serde(rename = "dlPort", default)]
    dl_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    #[serde(rename = "0")]
    hash: String,
    #[serde(rename = "2")]
    ext: String,
    #[serde(rename = "10")]
    filename: String,
    #[serde(rename = "rawSize")]
    raw_size: u64,
}

/// Client for the Easynews search and download API
pub struct EasynewsClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl EasynewsClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        EasynewsClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Search for video posts whose name matches the release, largest first
    async fn search(&self, release_name: &str) -> Result<(Vec<SearchRow>, SearchResponse)> {
        debug!("Searching easynews: release={}", release_name);
        let response = self
            .http
            .get(format!("{}{}", self.base_url, SEARCH))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[
                ("gps", release_name),
                ("fty[]", "VIDEO"),
                ("s1", "dsize"),
                ("s1d", "-"),
                ("pby", "20"),
                ("pno", "1"),
                ("sS", "5"),
                ("u", "1"),
            ])
            .send()
            .await?;
        let response = check_response(ProviderId::Easynews, response, SEARCH).await?;
        let mut body: SearchResponse = response.json().await?;

        let wanted = normalize(release_name);
        let mut rows: Vec<SearchRow> = std::mem::take(&mut body.data)
            .into_iter()
            .filter(|row| normalize(&row.filename) == wanted)
            .collect();
        rows.sort_by(|a, b| b.raw_size.cmp(&a.raw_size));
        Ok((rows, body))
    }

    /// Build the download link for a post from its stored parameters
    fn download_link(&self, file: &CachedFile) -> Result<String> {
        let param = |name: &str| {
            file.params.get(name).ok_or_else(|| {
                DebridError::ParseError(format!(
                    "easynews file {} is missing parameter '{}'",
                    file.path, name
                ))
            })
        };
        let hash = param(PARAM_HASH)?;
        let ext = param(PARAM_EXT)?;
        let filename = param(PARAM_FILENAME)?;

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| DebridError::ConfigError(format!("invalid easynews base url: {}", e)))?;
        url.set_username(&self.username)
            .and_then(|_| url.set_password(Some(&self.password)))
            .map_err(|_| {
                DebridError::ConfigError("easynews base url cannot carry credentials".to_string())
            })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                DebridError::ConfigError("easynews base url cannot be a base".to_string())
            })?;
            segments.pop_if_empty().push("dl");
            if let (Some(farm), Some(port)) =
                (file.params.get(PARAM_FARM), file.params.get(PARAM_PORT))
            {
                segments.push(farm).push(port);
            }
            segments
                .push(&format!("{}{}", hash, ext))
                .push(&format!("{}{}", filename, ext));
        }
        Ok(url.to_string())
    }

    fn to_cached_file(&self, row: &SearchRow, body: &SearchResponse) -> Result<CachedFile> {
        let path = format!("{}{}", row.filename, row.ext);
        let mut file = CachedFile::new(path, row.raw_size, String::new(), ProviderId::Easynews)
            .with_param(PARAM_HASH, row.hash.clone())
            .with_param(PARAM_EXT, row.ext.clone())
            .with_param(PARAM_FILENAME, row.filename.clone());
        if let (Some(farm), Some(port)) = (&body.dl_farm, body.dl_port) {
            file = file
                .with_param(PARAM_FARM, farm.clone())
                .with_param(PARAM_PORT, port.to_string());
        }
        file.mime_type = mime_for_path(&file.path).map(str::to_string);
        file.link = self.download_link(&file)?;
        Ok(file)
    }
}

#[async_trait]
impl DebridClient for EasynewsClient {
    fn provider(&self) -> ProviderId {
        ProviderId::Easynews
    }

    fn supports(&self, kind: ContentKind) -> bool {
        kind == ContentKind::Usenet
    }

    async fn is_cached(&self, key: &ContentKey) -> Result<bool> {
        let ContentKey::UsenetRelease { release_name } = key else {
            return Ok(false);
        };
        let (rows, _) = self.search(release_name).await?;
        Ok(!rows.is_empty())
    }

    async fn get_cached_files(&self, key: &ContentKey) -> Result<Vec<CachedFile>> {
        let ContentKey::UsenetRelease { release_name } = key else {
            return Ok(Vec::new());
        };
        let (rows, body) = self.search(release_name).await?;

        // Reposts of the same release share a name; only the largest is kept
        let files = match rows.first() {
            Some(row) => vec![self.to_cached_file(row, &body)?],
            None => Vec::new(),
        };
        info!(
            "Easynews listed cached files: release={}, files={}",
            release_name,
            files.len()
        );
        Ok(files)
    }

    async fn get_streamable_link(
        &self,
        key: &ContentKey,
        file: &CachedFile,
    ) -> Result<Option<String>> {
        if key.kind() != ContentKind::Usenet {
            return Ok(None);
        }
        self.download_link(file).map(Some)
    }
}

/// Compare release names ignoring case and separators
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
