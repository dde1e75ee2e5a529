use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default daily limit: two hours
pub const DEFAULT_DAILY_LIMIT_SECONDS: u64 = 7200;

/// Smallest accepted daily limit in minutes
pub const MIN_LIMIT_MINUTES: i64 = 1;

/// Largest accepted daily limit in minutes (a whole day)
pub const MAX_LIMIT_MINUTES: i64 = 1440;

/// Opaque user handle issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Per-user usage document as kept by the account store
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUsageRecord {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub daily_limit_seconds: u64,
    pub current_usage_seconds: u64,
    pub last_reset_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserUsageRecord {
    /// Create the record written at account creation
    pub fn new(user_id: UserId, daily_limit_seconds: u64, today: NaiveDate) -> Self {
        Self {
            user_id,
            email: None,
            daily_limit_seconds,
            current_usage_seconds: 0,
            last_reset_date: today,
            last_updated: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Daily limit rounded to whole minutes, as shown to the user
    pub fn limit_minutes(&self) -> u32 {
        ((self.daily_limit_seconds + 30) / 60) as u32
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.daily_limit_seconds.saturating_sub(self.current_usage_seconds)
    }
}

/// Partial update applied by `AccountStore::update_record`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_usage_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// Patch carrying the accrual-owned fields of a record
    pub fn usage_of(record: &UserUsageRecord) -> Self {
        Self {
            current_usage_seconds: Some(record.current_usage_seconds),
            last_reset_date: Some(record.last_reset_date),
            last_updated: record.last_updated,
            ..Default::default()
        }
    }

    pub fn limit(daily_limit_seconds: u64) -> Self {
        Self {
            daily_limit_seconds: Some(daily_limit_seconds),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.daily_limit_seconds.is_none()
            && self.current_usage_seconds.is_none()
            && self.last_reset_date.is_none()
            && self.last_updated.is_none()
    }

    pub fn apply_to(&self, record: &mut UserUsageRecord) {
        if let Some(limit) = self.daily_limit_seconds {
            record.daily_limit_seconds = limit;
        }
        if let Some(usage) = self.current_usage_seconds {
            record.current_usage_seconds = usage;
        }
        if let Some(date) = self.last_reset_date {
            record.last_reset_date = date;
        }
        if let Some(updated) = self.last_updated {
            record.last_updated = Some(updated);
        }
    }
}

/// Local calendar date used for rollover decisions
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}
