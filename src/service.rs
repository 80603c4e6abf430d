//! Virtual files backed by debrid providers
//!
//! [`ContentService`] ties resolution, per-file state and link streaming
//! together: adding content creates one virtual file per cached remote
//! file, and serving a virtual file picks a live provider link, refreshing
//! it when the provider has rotated it.

use crate::content_key::ContentKey;
use crate::error::{DebridError, Result};
use crate::metrics::ResolverMetrics;
use crate::models::{CachedFile, FileOutcome, FileProviderRecord, ProviderId, RangeRequest};
use crate::orchestrator::ResolutionOrchestrator;
use crate::store::FileStateStore;
use crate::streaming::{LinkRefresher, LinkStream, StreamingLinkPreparer};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A virtual file created from resolved content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    /// Path under the content root, e.g. `/movies/Movie/Movie.mkv`
    pub path: String,
    pub size: u64,
    pub mime_type: Option<String>,
    /// Providers holding a cached copy when the file was created
    pub providers: Vec<ProviderId>,
}

/// Entry point for creating and serving debrid-backed files
#[derive(Clone)]
pub struct ContentService {
    orchestrator: ResolutionOrchestrator,
    store: Arc<FileStateStore>,
    preparer: StreamingLinkPreparer,
}

impl ContentService {
    pub fn new(
        orchestrator: ResolutionOrchestrator,
        store: Arc<FileStateStore>,
        preparer: StreamingLinkPreparer,
    ) -> Self {
        ContentService {
            orchestrator,
            store,
            preparer,
        }
    }

    pub fn orchestrator(&self) -> &ResolutionOrchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<FileStateStore> {
        &self.store
    }

    fn metrics(&self) -> &ResolverMetrics {
        self.orchestrator.metrics()
    }

    /// Resolve `key` and create a virtual file under `root` for every
    /// remote file any provider has cached
    ///
    /// Every applicable provider gets a record on every created file, so
    /// providers that missed the content are revalidated later on their
    /// own schedule.
    pub async fn add_content(&self, key: &ContentKey, root: &str) -> Result<Vec<VirtualFile>> {
        let resolutions = self.orchestrator.resolve(key).await?;
        let files = ResolutionOrchestrator::cached_files_from(&resolutions);
        if files.is_empty() {
            warn!("No provider has content cached: key={}", key);
            return Err(DebridError::NoCachedFiles(key.to_string()));
        }

        let mut created: Vec<VirtualFile> = Vec::new();
        for file in &files {
            let path = virtual_path(root, &file.path);
            if let Some(existing) = created.iter_mut().find(|v| v.path == path) {
                if !existing.providers.contains(&file.provider) {
                    existing.providers.push(file.provider);
                }
                continue;
            }
            created.push(VirtualFile {
                path,
                size: file.size,
                mime_type: file.mime_type.clone(),
                providers: vec![file.provider],
            });
        }

        for virtual_file in &created {
            let remote_path = remote_path_of(&files, root, &virtual_file.path);
            for resolution in &resolutions {
                let outcome = resolution.outcome.for_file(remote_path);
                self.store
                    .upsert(&virtual_file.path, resolution.provider, &outcome)
                    .await?;
            }
        }

        info!(
            "Added content: key={}, root={}, files={}",
            key,
            root,
            created.len()
        );
        Ok(created)
    }

    /// Pick a servable link for the virtual file at `path`
    ///
    /// Any `Cached` record is served first, in insertion order, without
    /// touching the network. Only when none exists are non-cached records
    /// revalidated, in order, and only once their state's wait has elapsed.
    pub async fn file_link(&self, path: &str, key: &ContentKey) -> Result<CachedFile> {
        let records = self.store.get_state(path).await?;
        if let Some(file) = records.iter().find_map(FileProviderRecord::to_cached_file) {
            return Ok(file);
        }

        let remote_path = records
            .iter()
            .find_map(|r| r.remote_path.clone())
            .unwrap_or_else(|| file_name(path).to_string());

        for record in &records {
            if !self.store.is_stale(record) {
                debug!(
                    "Skipping fresh record: path={}, provider={}, state={:?}",
                    path, record.provider, record.state
                );
                continue;
            }

            debug!(
                "Revalidating stale record: path={}, provider={}, state={:?}",
                path, record.provider, record.state
            );
            let outcome = self
                .orchestrator
                .resolve_provider(key, record.provider)
                .await?
                .for_file(&remote_path);
            let updated = self.store.upsert(path, record.provider, &outcome).await?;
            if let Some(file) = updated.to_cached_file() {
                info!(
                    "Provider recovered file: path={}, provider={}",
                    path, record.provider
                );
                return Ok(file);
            }
        }

        warn!("No live link: path={}, records={}", path, records.len());
        Err(DebridError::NoLiveLink {
            path: path.to_string(),
        })
    }

    /// Ask `dead`'s provider for a fresh link and record the result
    pub async fn refresh_link(
        &self,
        path: &str,
        key: &ContentKey,
        dead: &CachedFile,
    ) -> Result<CachedFile> {
        let outcome = self
            .orchestrator
            .refresh_file(key, dead)
            .await?
            .for_file(&dead.path);
        let updated = self.store.upsert(path, dead.provider, &outcome).await?;

        match (outcome, updated.to_cached_file()) {
            (FileOutcome::Cached(_), Some(fresh)) => {
                info!(
                    "Refreshed link: path={}, provider={}",
                    path, dead.provider
                );
                self.metrics().record_link_refresh(dead.provider, true);
                Ok(fresh)
            }
            (outcome, _) => {
                warn!(
                    "Link refresh failed: path={}, provider={}, state={:?}",
                    path,
                    dead.provider,
                    outcome.state()
                );
                self.metrics().record_link_refresh(dead.provider, false);
                Err(DebridError::NoLiveLink {
                    path: path.to_string(),
                })
            }
        }
    }

    /// Open an upstream stream for `path`, optionally limited to `range`
    ///
    /// A link that is dead before the transfer starts is refreshed once; a
    /// link that dies mid-transfer is refreshed once by the returned stream.
    pub async fn open_stream(
        &self,
        path: &str,
        key: &ContentKey,
        range: Option<RangeRequest>,
    ) -> Result<LinkStream> {
        let mut file = self.file_link(path, key).await?;
        let mut refreshed = false;

        if !self.preparer.is_link_alive(&file).await {
            self.metrics().record_dead_link(file.provider);
            file = self.refresh_link(path, key, &file).await?;
            refreshed = true;
        }

        let refresher: Arc<dyn LinkRefresher> = Arc::new(StoredLinkRefresher {
            service: self.clone(),
            path: path.to_string(),
            key: key.clone(),
        });

        let prepared = self.preparer.prepare_range(&file, range)?;
        let error = match self
            .preparer
            .open(file.clone(), prepared, refresher.clone())
            .await
        {
            Ok(stream) => return Ok(stream),
            Err(e @ DebridError::InvalidRange(_)) => return Err(e),
            Err(e) => e,
        };

        if refreshed {
            warn!(
                "Upstream failed after refresh: path={}, error={}",
                path, error
            );
            return Err(DebridError::NoLiveLink {
                path: path.to_string(),
            });
        }

        warn!(
            "Upstream request failed, refreshing link: path={}, provider={}, error={}",
            path, file.provider, error
        );
        self.metrics().record_dead_link(file.provider);
        let fresh = self.refresh_link(path, key, &file).await?;
        let prepared = self.preparer.prepare_range(&fresh, range)?;
        self.preparer
            .open(fresh, prepared, refresher)
            .await
            .map_err(|e| {
                warn!("Upstream failed after refresh: path={}, error={}", path, e);
                DebridError::NoLiveLink {
                    path: path.to_string(),
                }
            })
    }

    /// Remove the virtual file at `path` and all its provider records
    pub async fn delete_file(&self, path: &str) -> Result<bool> {
        self.store.delete_file(path).await
    }
}

/// Refreshes a dying stream's link through the service, so the new link is
/// recorded for the next reader too
struct StoredLinkRefresher {
    service: ContentService,
    path: String,
    key: ContentKey,
}

#[async_trait]
impl LinkRefresher for StoredLinkRefresher {
    async fn refresh(&self, dead: &CachedFile) -> Result<CachedFile> {
        self.service.metrics().record_dead_link(dead.provider);
        self.service.refresh_link(&self.path, &self.key, dead).await
    }
}

/// Join a content root and a provider-relative path
pub fn virtual_path(root: &str, remote_path: &str) -> String {
    let root = root.trim_end_matches('/');
    let remote_path = remote_path.trim_start_matches('/');
    if root.is_empty() {
        format!("/{}", remote_path)
    } else {
        format!("{}/{}", root, remote_path)
    }
}

fn remote_path_of<'a>(files: &'a [CachedFile], root: &str, path: &str) -> &'a str {
    files
        .iter()
        .find(|f| virtual_path(root, &f.path) == path)
        .map_or("", |f| f.path.as_str())
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
