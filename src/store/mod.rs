//! Per-file, per-provider resolution state
//!
//! [`FileStateStore`] is the only writer of [`FileProviderRecord`]s. It sits
//! on a [`RecordStore`] backend and decides, at read time, whether a
//! record is old enough to warrant hitting the provider again.

mod json_file;
mod memory;

pub use json_file::JsonFileRecordStore;
pub use memory::MemoryRecordStore;

use crate::config::DebridConfig;
use crate::error::Result;
use crate::models::{CachedFile, FileOutcome, FileProviderRecord, FileState, ProviderId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Durable storage of the records owned by each virtual file
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records of `path`, in insertion order; empty if the file is unknown
    async fn load(&self, path: &str) -> Result<Vec<FileProviderRecord>>;

    /// Replace all records of `path`
    async fn save(&self, path: &str, records: Vec<FileProviderRecord>) -> Result<()>;

    /// Remove `path` and all its records; returns whether it existed
    async fn delete(&self, path: &str) -> Result<bool>;

    /// All known file paths
    async fn paths(&self) -> Result<Vec<String>>;

    /// Every record of `provider` currently in `state`, with its file path
    async fn find(
        &self,
        provider: ProviderId,
        state: FileState,
    ) -> Result<Vec<(String, FileProviderRecord)>>;
}

/// How long each non-cached state stays fresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessPolicy {
    waits: HashMap<FileState, Duration>,
}

impl StalenessPolicy {
    pub fn new(
        wait_after_missing: Duration,
        wait_after_provider_error: Duration,
        wait_after_network_error: Duration,
        wait_after_client_error: Duration,
    ) -> Self {
        let waits = HashMap::from([
            (FileState::Missing, wait_after_missing),
            (FileState::ProviderError, wait_after_provider_error),
            (FileState::NetworkError, wait_after_network_error),
            (FileState::ClientError, wait_after_client_error),
        ]);
        StalenessPolicy { waits }
    }

    pub fn from_config(config: &DebridConfig) -> Self {
        let wait = |state| config.wait_for(state).unwrap_or_default();
        Self::new(
            wait(FileState::Missing),
            wait(FileState::ProviderError),
            wait(FileState::NetworkError),
            wait(FileState::ClientError),
        )
    }

    /// Freshness window of `state`; `None` for `Cached`, which never goes
    /// stale by age
    pub fn wait_for(&self, state: FileState) -> Option<Duration> {
        self.waits.get(&state).copied()
    }

    /// A record is stale when strictly more than its state's wait has passed
    /// since it was checked
    pub fn is_stale_at(&self, record: &FileProviderRecord, now: SystemTime) -> bool {
        let Some(wait) = self.wait_for(record.state) else {
            return false;
        };
        match now.duration_since(record.last_checked) {
            Ok(age) => age > wait,
            // Checked "in the future" (clock stepped back): fresh
            Err(_) => false,
        }
    }
}

/// Single source of truth for "should we hit the network again"
pub struct FileStateStore {
    backend: Arc<dyn RecordStore>,
    policy: StalenessPolicy,
    // Serializes read-modify-write of a file's record list so concurrent
    // upserts from different providers never drop each other's records
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(backend: Arc<dyn RecordStore>, policy: StalenessPolicy) -> Self {
        FileStateStore {
            backend,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// All records of `path`, one per provider ever attempted
    pub async fn get_state(&self, path: &str) -> Result<Vec<FileProviderRecord>> {
        self.backend.load(path).await
    }

    /// Record `outcome` for (`path`, `provider`), checked now
    pub async fn upsert(
        &self,
        path: &str,
        provider: ProviderId,
        outcome: &FileOutcome,
    ) -> Result<FileProviderRecord> {
        self.upsert_at(path, provider, outcome, SystemTime::now())
            .await
    }

    /// Record `outcome` for (`path`, `provider`) as checked at `now`
    ///
    /// Replaces the provider's existing record in place or appends a new
    /// one. `last_checked` never moves backwards.
    pub async fn upsert_at(
        &self,
        path: &str,
        provider: ProviderId,
        outcome: &FileOutcome,
        now: SystemTime,
    ) -> Result<FileProviderRecord> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.backend.load(path).await?;

        let position = records.iter().position(|r| r.provider == provider);
        let previous = position.map(|i| &records[i]);
        let checked_at = previous.map_or(now, |p| p.last_checked.max(now));
        let record = FileProviderRecord::from_outcome(provider, outcome, checked_at, previous);

        match position {
            Some(i) => records[i] = record.clone(),
            None => records.push(record.clone()),
        }
        self.backend.save(path, records).await?;

        debug!(
            "Upserted file state: path={}, provider={}, state={:?}",
            path, provider, record.state
        );
        Ok(record)
    }

    pub fn is_stale(&self, record: &FileProviderRecord) -> bool {
        self.policy.is_stale_at(record, SystemTime::now())
    }

    /// First `Cached` record of `path`, as a servable file
    pub async fn cached_file(&self, path: &str) -> Result<Option<CachedFile>> {
        Ok(self
            .get_state(path)
            .await?
            .iter()
            .find_map(FileProviderRecord::to_cached_file))
    }

    /// Delete a virtual file and, with it, all of its records
    pub async fn delete_file(&self, path: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let existed = self.backend.delete(path).await?;
        if existed {
            info!("Deleted file state: path={}", path);
        }
        Ok(existed)
    }

    /// Bulk maintenance query: every record of `provider` in `state`
    pub async fn records_with(
        &self,
        provider: ProviderId,
        state: FileState,
    ) -> Result<Vec<(String, FileProviderRecord)>> {
        self.backend.find(provider, state).await
    }

    /// Paths of every known virtual file
    pub async fn paths(&self) -> Result<Vec<String>> {
        self.backend.paths().await
    }
}
