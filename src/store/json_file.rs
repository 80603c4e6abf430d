//! Record store persisted as a JSON snapshot
//!
//! Every mutation rewrites the whole snapshot: it is serialized, written to a
//! temporary file next to the target and renamed over it, so a crash leaves
//! either the old or the new snapshot on disk, never a torn one.

use super::RecordStore;
use crate::error::{DebridError, Result};
use crate::models::{FileProviderRecord, FileState, ProviderId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;
use tracing::{info, warn};

type Files = HashMap<String, Vec<FileProviderRecord>>;

/// Record store that survives restarts
#[derive(Debug)]
pub struct JsonFileRecordStore {
    path: PathBuf,
    // Held across the disk write so snapshots land in mutation order
    files: Mutex<Files>,
}

impl JsonFileRecordStore {
    /// Open the store at `path`, loading the existing snapshot if any
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let files = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut files: Files = serde_json::from_slice(&bytes).map_err(|e| {
                    DebridError::StoreError(format!(
                        "Failed to parse state file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                demote_inconsistent(&mut files);
                info!(
                    "Loaded state file: path={}, files={}",
                    path.display(),
                    files.len()
                );
                files
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("State file not found, starting empty: path={}", path.display());
                Files::new()
            }
            Err(e) => {
                return Err(DebridError::StoreError(format!(
                    "Failed to read state file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(JsonFileRecordStore {
            path,
            files: Mutex::new(files),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, files: &Files) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(files)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| DebridError::InternalError(format!("Task join error: {}", e)))?
    }
}

/// A `Cached` record without link or size cannot be served
///
/// It is demoted to a `ProviderError` checked at the epoch, keeping what is
/// known about the file. The file stays known and its next read revalidates.
fn demote_inconsistent(files: &mut Files) {
    for (path, records) in files.iter_mut() {
        for record in records.iter_mut().filter(|r| !r.is_consistent()) {
            warn!(
                "Demoted inconsistent record from state file: path={}, provider={}",
                path, record.provider
            );
            record.state = FileState::ProviderError;
            record.link = None;
            record.last_checked = UNIX_EPOCH;
        }
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| DebridError::StoreError(format!("Failed to persist state file: {}", e)))?;
    Ok(())
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn load(&self, path: &str) -> Result<Vec<FileProviderRecord>> {
        Ok(self.files.lock().await.get(path).cloned().unwrap_or_default())
    }

    async fn save(&self, path: &str, records: Vec<FileProviderRecord>) -> Result<()> {
        let mut files = self.files.lock().await;
        let previous = files.insert(path.to_string(), records);
        if let Err(e) = self.persist(&files).await {
            // Keep memory in step with disk
            match previous {
                Some(previous) => files.insert(path.to_string(), previous),
                None => files.remove(path),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let mut files = self.files.lock().await;
        let Some(previous) = files.remove(path) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&files).await {
            files.insert(path.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn paths(&self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self.files.lock().await.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    async fn find(
        &self,
        provider: ProviderId,
        state: FileState,
    ) -> Result<Vec<(String, FileProviderRecord)>> {
        let files = self.files.lock().await;
        let mut found: Vec<(String, FileProviderRecord)> = files
            .iter()
            .flat_map(|(path, records)| {
                records
                    .iter()
                    .filter(|r| r.provider == provider && r.state == state)
                    .map(move |r| (path.clone(), r.clone()))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}
