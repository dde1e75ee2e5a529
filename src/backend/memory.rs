use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use super::store::{AccountStore, RecordSubscription, CHANGE_CHANNEL_CAPACITY};
use crate::error::{LimiterError, Result};
use crate::limits::record::{RecordPatch, UserId, UserUsageRecord};

/// In-process account store.
///
/// Used by tests and by embedders that sync the records themselves. Reads and
/// writes can be made to fail on demand to exercise retry paths.
pub struct MemoryAccountStore {
    records: Mutex<HashMap<UserId, UserUsageRecord>>,
    changes: broadcast::Sender<UserUsageRecord>,
    failing_writes: AtomicU32,
    failing_reads: AtomicU32,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(HashMap::new()),
            changes,
            failing_writes: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
        }
    }

    pub fn with_record(record: UserUsageRecord) -> Self {
        let store = Self::new();
        if let Ok(mut records) = store.records.lock() {
            records.insert(record.user_id.clone(), record);
        }
        store
    }

    /// Make the next `count` writes fail with a persistence error
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail with a persistence error
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Simulate an edit made on another device: store it and notify subscribers
    pub fn push_remote(&self, record: UserUsageRecord) -> Result<()> {
        self.records()?.insert(record.user_id.clone(), record.clone());
        let _ = self.changes.send(record);
        Ok(())
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<UserId, UserUsageRecord>>> {
        self.records
            .lock()
            .map_err(|_| LimiterError::Persistence("record map poisoned".to_string()))
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for MemoryAccountStore {
    fn get_record(&self, user_id: &UserId) -> Result<UserUsageRecord> {
        if Self::take_failure(&self.failing_reads) {
            return Err(LimiterError::from_provider("unavailable", user_id.as_str(), "injected read failure"));
        }

        self.records()?
            .get(user_id)
            .cloned()
            .ok_or_else(|| LimiterError::NotFound(user_id.to_string()))
    }

    fn set_record(&self, record: &UserUsageRecord) -> Result<()> {
        if Self::take_failure(&self.failing_writes) {
            return Err(LimiterError::from_provider("unavailable", record.user_id.as_str(), "injected write failure"));
        }

        self.records()?.insert(record.user_id.clone(), record.clone());
        let _ = self.changes.send(record.clone());
        Ok(())
    }

    fn update_record(&self, user_id: &UserId, patch: &RecordPatch) -> Result<UserUsageRecord> {
        if Self::take_failure(&self.failing_writes) {
            return Err(LimiterError::from_provider("unavailable", user_id.as_str(), "injected write failure"));
        }

        let updated = {
            let mut records = self.records()?;
            let record = records
                .get_mut(user_id)
                .ok_or_else(|| LimiterError::NotFound(user_id.to_string()))?;
            patch.apply_to(record);
            record.clone()
        };

        let _ = self.changes.send(updated.clone());
        Ok(updated)
    }

    fn subscribe(&self, user_id: &UserId) -> Result<RecordSubscription> {
        Ok(RecordSubscription::new(user_id.clone(), self.changes.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;

    fn record(id: &str) -> UserUsageRecord {
        UserUsageRecord::new(UserId::new(id), 7200, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn missing_record_is_not_found() {
        let store = MemoryAccountStore::new();
        let err = store.get_record(&UserId::new("nobody")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn update_applies_patch() {
        let store = MemoryAccountStore::with_record(record("u1"));
        let updated = store
            .update_record(&UserId::new("u1"), &RecordPatch::limit(600))
            .unwrap();
        assert_eq!(updated.daily_limit_seconds, 600);
        assert_eq!(store.get_record(&UserId::new("u1")).unwrap().daily_limit_seconds, 600);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = MemoryAccountStore::with_record(record("u1"));
        store.fail_next_writes(2);

        let patch = RecordPatch::limit(600);
        assert_eq!(store.update_record(&UserId::new("u1"), &patch).unwrap_err().kind(), ErrorKind::Persistence);
        assert_eq!(store.update_record(&UserId::new("u1"), &patch).unwrap_err().kind(), ErrorKind::Persistence);
        assert!(store.update_record(&UserId::new("u1"), &patch).is_ok());
    }

    #[tokio::test]
    async fn subscription_filters_by_user() {
        let store = MemoryAccountStore::new();
        store.set_record(&record("u1")).unwrap();
        let mut subscription = store.subscribe(&UserId::new("u1")).unwrap();

        store.set_record(&record("u2")).unwrap();
        store.update_record(&UserId::new("u1"), &RecordPatch::limit(60)).unwrap();

        let change = subscription.next().await.unwrap();
        assert_eq!(change.user_id, UserId::new("u1"));
        assert_eq!(change.daily_limit_seconds, 60);
    }
}
