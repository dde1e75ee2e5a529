use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::record::UserId;

/// Current history file version
pub const HISTORY_VERSION: &str = "1.0";

/// Number of days kept in history
pub const HISTORY_DAYS: usize = 90;

/// Usage of one user on one finished day
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRecord {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub usage_seconds: u64,
    pub limit_seconds: u64,
}

impl DayRecord {
    pub fn percent_of_limit(&self) -> f64 {
        if self.limit_seconds == 0 {
            return 0.0;
        }
        self.usage_seconds as f64 / self.limit_seconds as f64 * 100.0
    }
}

/// Historical usage data, newest first
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsageHistory {
    pub version: String,
    pub records: Vec<DayRecord>,
}

impl UsageHistory {
    pub fn new() -> Self {
        Self {
            version: HISTORY_VERSION.to_string(),
            records: Vec::new(),
        }
    }

    /// Add a day record
    pub fn add_record(&mut self, record: DayRecord) {
        // A day is archived once; a repeat replaces the earlier entry
        self.records
            .retain(|r| !(r.user_id == record.user_id && r.date == record.date));

        let pos = self
            .records
            .iter()
            .position(|r| r.date < record.date)
            .unwrap_or(self.records.len());
        self.records.insert(pos, record);

        // Keep only the most recent days per user
        let mut seen: std::collections::HashMap<UserId, usize> = std::collections::HashMap::new();
        self.records.retain(|r| {
            let count = seen.entry(r.user_id.clone()).or_insert(0);
            *count += 1;
            *count <= HISTORY_DAYS
        });
    }

    /// Get the most recent `days` records for a user
    pub fn user_records(&self, user_id: &UserId, days: usize) -> Vec<&DayRecord> {
        self.records
            .iter()
            .filter(|r| &r.user_id == user_id)
            .take(days)
            .collect()
    }

    /// Summarize a user's usage over a period
    pub fn summary(&self, user_id: &UserId, period: Period) -> UsageSummary {
        UsageSummary::from_records(&self.user_records(user_id, period.days()), period)
    }
}

impl Default for UsageHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Reporting window for usage summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn days(self) -> usize {
        match self {
            Period::Daily => 1,
            Period::Weekly => 7,
            Period::Monthly => 30,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Daily => "day",
            Period::Weekly => "week",
            Period::Monthly => "month",
        }
    }
}

/// Aggregate usage over a period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub period: Period,
    pub days: usize,
    pub total_seconds: u64,
    pub average_seconds: u64,
    pub limit_used_percent: f64,
}

impl UsageSummary {
    fn from_records(records: &[&DayRecord], period: Period) -> Self {
        let total_seconds: u64 = records.iter().map(|r| r.usage_seconds).sum();
        let total_limit: u64 = records.iter().map(|r| r.limit_seconds).sum();

        let average_seconds = if records.is_empty() {
            0
        } else {
            total_seconds / records.len() as u64
        };

        let limit_used_percent = if total_limit > 0 {
            total_seconds as f64 / total_limit as f64 * 100.0
        } else {
            0.0
        };

        Self {
            period,
            days: records.len(),
            total_seconds,
            average_seconds,
            limit_used_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(user: &str, offset: i64, usage: u64) -> DayRecord {
        let base = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        DayRecord {
            user_id: UserId::new(user),
            date: base - Duration::days(offset),
            usage_seconds: usage,
            limit_seconds: 3600,
        }
    }

    #[test]
    fn records_are_kept_newest_first() {
        let mut history = UsageHistory::new();
        history.add_record(day("u1", 2, 10));
        history.add_record(day("u1", 0, 30));
        history.add_record(day("u1", 1, 20));

        let usages: Vec<u64> = history.records.iter().map(|r| r.usage_seconds).collect();
        assert_eq!(usages, vec![30, 20, 10]);
    }

    #[test]
    fn rearchiving_a_day_replaces_it() {
        let mut history = UsageHistory::new();
        history.add_record(day("u1", 0, 30));
        history.add_record(day("u1", 0, 45));

        assert_eq!(history.records.len(), 1);
        assert_eq!(history.records[0].usage_seconds, 45);
    }

    #[test]
    fn history_limits_to_90_days_per_user() {
        let mut history = UsageHistory::new();
        for i in 0..100 {
            history.add_record(day("u1", i, 60));
        }
        history.add_record(day("u2", 0, 60));

        assert_eq!(history.user_records(&UserId::new("u1"), usize::MAX).len(), 90);
        assert_eq!(history.user_records(&UserId::new("u2"), usize::MAX).len(), 1);
    }

    #[test]
    fn weekly_summary_uses_last_seven_days() {
        let mut history = UsageHistory::new();
        for i in 0..10 {
            history.add_record(day("u1", i, 1800));
        }

        let summary = history.summary(&UserId::new("u1"), Period::Weekly);
        assert_eq!(summary.days, 7);
        assert_eq!(summary.total_seconds, 7 * 1800);
        assert_eq!(summary.average_seconds, 1800);
        assert!((summary.limit_used_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_summary_is_zero() {
        let history = UsageHistory::new();
        let summary = history.summary(&UserId::new("u1"), Period::Monthly);
        assert_eq!(summary.days, 0);
        assert_eq!(summary.total_seconds, 0);
        assert_eq!(summary.average_seconds, 0);
        assert_eq!(summary.limit_used_percent, 0.0);
    }
}
