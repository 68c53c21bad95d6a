use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{RecordFilter, RecordStore};
use crate::error::Result;
use crate::models::{Item, RecordKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub record: Item,
    pub saved_at: DateTime<Utc>,
}

/// Backup store: the whole record list lives in one JSON file that is
/// rewritten (temp file + rename) on every change.
pub struct BackupStore {
    path: PathBuf,
    records: Mutex<Vec<BackupRecord>>,
}

impl BackupStore {
    /// Open the backup file. A missing file is an empty store; an unreadable one
    /// is reported and treated as empty so the primary store stays usable.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Vec<BackupRecord>>(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Backup file {} is unreadable, starting empty: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!("Backup store opened at {} with {} records", path.display(), records.len());

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    async fn flush(&self, records: &[BackupRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Flushed {} backup records", records.len());
        Ok(())
    }
}

#[async_trait]
impl RecordStore for BackupStore {
    fn name(&self) -> &'static str {
        "backup"
    }

    #[instrument(skip(self, item), fields(key = %item.record_key()))]
    async fn upsert(&self, item: &Item) -> Result<()> {
        let mut records = self.records.lock().await;
        let key = item.record_key();
        let entry = BackupRecord {
            record: item.clone(),
            saved_at: Utc::now(),
        };

        match records.iter_mut().find(|r| r.record.record_key() == key) {
            Some(existing) => *existing = entry,
            None => records.push(entry),
        }

        self.flush(&records).await
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &RecordKey) -> Result<()> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.record.record_key() != *key);

        if records.len() == before {
            return Ok(());
        }
        self.flush(&records).await
    }

    async fn query(&self, filter: RecordFilter) -> Result<Vec<Item>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| filter.matches(&r.record))
            .map(|r| r.record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaType, Status};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");

        let store = BackupStore::open(&path).await.unwrap();
        let item = Item::new(5, MediaType::Manga, "Yotsuba&!", Status::Planned);
        store.upsert(&item).await.unwrap();
        store.upsert(&item.with_status(Status::InProgress)).await.unwrap();
        assert_eq!(store.len().await, 1);
        drop(store);

        let reopened = BackupStore::open(&path).await.unwrap();
        let found = reopened
            .query(RecordFilter {
                media_type: MediaType::Manga,
                status: Status::InProgress,
                is_rewatch: false,
            })
            .await
            .unwrap();
        assert_eq!(found, vec![item.with_status(Status::InProgress)]);
    }

    #[tokio::test]
    async fn test_corrupt_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = BackupStore::open(&path).await.unwrap();
        assert!(store.is_empty().await);
    }
}
