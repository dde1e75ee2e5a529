use tokio::sync::broadcast;
use tracing::warn;

use crate::error::Result;
use crate::limits::record::{RecordPatch, UserId, UserUsageRecord};

/// Capacity of the change-notification channel shared by all subscribers
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Document store holding one usage record per user
pub trait AccountStore: Send + Sync {
    /// Fetch the record for a user, `NotFound` if none exists
    fn get_record(&self, user_id: &UserId) -> Result<UserUsageRecord>;

    /// Create or replace a whole record
    fn set_record(&self, record: &UserUsageRecord) -> Result<()>;

    /// Apply a partial update, returning the stored result
    fn update_record(&self, user_id: &UserId, patch: &RecordPatch) -> Result<UserUsageRecord>;

    /// Subscribe to changes of one user's record
    fn subscribe(&self, user_id: &UserId) -> Result<RecordSubscription>;
}

/// Stream of change notifications for a single user's record
pub struct RecordSubscription {
    user_id: UserId,
    receiver: broadcast::Receiver<UserUsageRecord>,
}

impl RecordSubscription {
    pub(crate) fn new(user_id: UserId, receiver: broadcast::Receiver<UserUsageRecord>) -> Self {
        Self { user_id, receiver }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Wait for the next change to this user's record.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn next(&mut self) -> Option<UserUsageRecord> {
        loop {
            match self.receiver.recv().await {
                Ok(record) if record.user_id == self.user_id => return Some(record),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Only the latest state matters; the next message is newer anyway
                    warn!("Subscription for {} skipped {} stale updates", self.user_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
