//! In-memory record store

use super::RecordStore;
use crate::error::Result;
use crate::models::{FileProviderRecord, FileState, ProviderId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Record store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    files: RwLock<HashMap<String, Vec<FileProviderRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self, path: &str) -> Result<Vec<FileProviderRecord>> {
        Ok(self.files.read().await.get(path).cloned().unwrap_or_default())
    }

    async fn save(&self, path: &str, records: Vec<FileProviderRecord>) -> Result<()> {
        self.files.write().await.insert(path.to_string(), records);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.files.write().await.remove(path).is_some())
    }

    async fn paths(&self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self.files.read().await.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    async fn find(
        &self,
        provider: ProviderId,
        state: FileState,
    ) -> Result<Vec<(String, FileProviderRecord)>> {
        let files = self.files.read().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileOutcome;
    use std::time::SystemTime;

    fn record(provider: ProviderId, outcome: FileOutcome) -> FileProviderRecord {
        FileProviderRecord::from_outcome(provider, &outcome, SystemTime::now(), None)
    }

    #[tokio::test]
    async fn test_find_by_provider_and_state() {
        let store = MemoryRecordStore::new();
        store
            .save(
                "/b",
                vec![
                    record(ProviderId::Premiumize, FileOutcome::Missing),
                    record(ProviderId::Easynews, FileOutcome::Missing),
                ],
            )
            .await
            .unwrap();
        store
            .save("/a", vec![record(ProviderId::Premiumize, FileOutcome::Missing)])
            .await
            .unwrap();

        let found = store
            .find(ProviderId::Premiumize, FileState::Missing)
            .await
            .unwrap();
        let paths: Vec<&str> = found.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);

        assert!(store
            .find(ProviderId::Easynews, FileState::Cached)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.paths().await.unwrap(), vec!["/a", "/b"]);
    }
}
