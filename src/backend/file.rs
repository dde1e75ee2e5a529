use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::fs::atomic_write;
use super::store::{AccountStore, RecordSubscription, CHANGE_CHANNEL_CAPACITY};
use crate::error::{LimiterError, Result};
use crate::limits::record::{RecordPatch, UserId, UserUsageRecord};

/// Current records file version
const RECORDS_VERSION: &str = "1.0";

/// On-disk layout of the records file
#[derive(Debug, Clone, Deserialize, Serialize)]
struct RecordsFile {
    version: String,
    records: BTreeMap<UserId, UserUsageRecord>,
}

impl RecordsFile {
    fn new() -> Self {
        Self {
            version: RECORDS_VERSION.to_string(),
            records: BTreeMap::new(),
        }
    }
}

/// Account store backed by a single JSON document on disk.
///
/// Change notifications cover writes made through this instance only.
pub struct FileAccountStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<UserUsageRecord>,
}

impl FileAccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> anyhow::Result<RecordsFile> {
        if !self.path.exists() {
            return Ok(RecordsFile::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read records file: {}", self.path.display()))?;

        let file: RecordsFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse records file: {}", self.path.display()))?;

        if file.version != RECORDS_VERSION {
            anyhow::bail!(
                "Records file version mismatch (expected {}, got {})",
                RECORDS_VERSION,
                file.version
            );
        }

        Ok(file)
    }

    fn save(&self, file: &RecordsFile) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(file)
            .context("Failed to serialize records")?;

        atomic_write(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write records file: {}", self.path.display()))
    }

    /// Read-modify-write under the instance lock
    fn modify<T>(
        &self,
        change: impl FnOnce(&mut RecordsFile) -> Result<(T, UserUsageRecord)>,
    ) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LimiterError::Persistence("records lock poisoned".to_string()))?;

        let mut file = self.load().map_err(persistence)?;
        let (value, changed) = change(&mut file)?;
        self.save(&file).map_err(persistence)?;

        debug!("Stored record for {}", changed.user_id);
        let _ = self.changes.send(changed);
        Ok(value)
    }
}

fn persistence(err: anyhow::Error) -> LimiterError {
    LimiterError::Persistence(format!("{:#}", err))
}

impl AccountStore for FileAccountStore {
    fn get_record(&self, user_id: &UserId) -> Result<UserUsageRecord> {
        let file = self.load().map_err(persistence)?;
        file.records
            .get(user_id)
            .cloned()
            .ok_or_else(|| LimiterError::NotFound(user_id.to_string()))
    }

    fn set_record(&self, record: &UserUsageRecord) -> Result<()> {
        self.modify(|file| {
            file.records.insert(record.user_id.clone(), record.clone());
            Ok(((), record.clone()))
        })
    }

    fn update_record(&self, user_id: &UserId, patch: &RecordPatch) -> Result<UserUsageRecord> {
        self.modify(|file| {
            let record = file
                .records
                .get_mut(user_id)
                .ok_or_else(|| LimiterError::NotFound(user_id.to_string()))?;
            patch.apply_to(record);
            Ok((record.clone(), record.clone()))
        })
    }

    fn subscribe(&self, user_id: &UserId) -> Result<RecordSubscription> {
        Ok(RecordSubscription::new(user_id.clone(), self.changes.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_fs::prelude::*;
    use chrono::NaiveDate;
    use predicates::prelude::*;

    fn record(id: &str) -> UserUsageRecord {
        UserUsageRecord::new(UserId::new(id), 7200, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn missing_file_means_no_records() {
        let temp = assert_fs::TempDir::new().unwrap();
        let store = FileAccountStore::new(temp.child("records.json").path());

        let err = store.get_record(&UserId::new("u1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn set_then_update_persists_to_disk() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.child("data").child("records.json");
        let store = FileAccountStore::new(path.path());

        store.set_record(&record("u1")).unwrap();
        path.assert(predicate::path::exists());
        path.assert(predicate::str::contains("\"dailyLimitSeconds\": 7200"));

        let patch = RecordPatch {
            current_usage_seconds: Some(300),
            ..Default::default()
        };
        store.update_record(&UserId::new("u1"), &patch).unwrap();

        let reopened = FileAccountStore::new(path.path());
        assert_eq!(reopened.get_record(&UserId::new("u1")).unwrap().current_usage_seconds, 300);
    }

    #[test]
    fn update_of_unknown_user_fails_without_writing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.child("records.json");
        let store = FileAccountStore::new(path.path());

        let err = store
            .update_record(&UserId::new("ghost"), &RecordPatch::limit(60))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        path.assert(predicate::path::missing());
    }

    #[test]
    fn corrupt_file_is_a_persistence_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.child("records.json");
        path.write_str("not json").unwrap();

        let store = FileAccountStore::new(path.path());
        let err = store.get_record(&UserId::new("u1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[tokio::test]
    async fn writes_notify_subscribers() {
        let temp = assert_fs::TempDir::new().unwrap();
        let store = FileAccountStore::new(temp.child("records.json").path());
        store.set_record(&record("u1")).unwrap();

        let mut subscription = store.subscribe(&UserId::new("u1")).unwrap();
        store.update_record(&UserId::new("u1"), &RecordPatch::limit(900)).unwrap();

        assert_eq!(subscription.next().await.unwrap().daily_limit_seconds, 900);
    }
}
