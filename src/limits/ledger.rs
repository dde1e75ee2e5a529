use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::history::DayRecord;
use super::record::{RecordPatch, UserId, UserUsageRecord, MAX_LIMIT_MINUTES, MIN_LIMIT_MINUTES};
use crate::backend::{AccountStore, UsageArchive};
use crate::error::{LimiterError, Result};

/// Outcome of a rollover check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollover {
    pub record: UserUsageRecord,
    /// Prior day's total, present only when a reset happened
    pub archived: Option<DayRecord>,
}

/// Reset usage if the record was last reset on another day
pub fn apply_rollover_if_needed(record: &UserUsageRecord, today: NaiveDate) -> Rollover {
    if record.last_reset_date == today {
        return Rollover {
            record: record.clone(),
            archived: None,
        };
    }

    let archived = DayRecord {
        user_id: record.user_id.clone(),
        date: record.last_reset_date,
        usage_seconds: record.current_usage_seconds,
        limit_seconds: record.daily_limit_seconds,
    };

    let mut reset = record.clone();
    reset.current_usage_seconds = 0;
    reset.last_reset_date = today;

    Rollover {
        record: reset,
        archived: Some(archived),
    }
}

/// Add elapsed seconds to the usage counter
pub fn accrue<Tz: TimeZone>(record: &UserUsageRecord, delta_seconds: u64, now: DateTime<Tz>) -> UserUsageRecord {
    let mut accrued = record.clone();
    accrued.current_usage_seconds = record.current_usage_seconds.saturating_add(delta_seconds);
    accrued.last_updated = Some(now.with_timezone(&Utc));
    accrued
}

/// Validate a limit in minutes and store it as seconds
pub fn set_limit(record: &UserUsageRecord, new_limit_minutes: i64) -> Result<UserUsageRecord> {
    if !(MIN_LIMIT_MINUTES..=MAX_LIMIT_MINUTES).contains(&new_limit_minutes) {
        return Err(LimiterError::InvalidLimit(new_limit_minutes));
    }

    let mut updated = record.clone();
    updated.daily_limit_seconds = (new_limit_minutes as u64) * 60;
    Ok(updated)
}

/// Usage has reached the limit; reaching it exactly counts
pub fn is_blocked(record: &UserUsageRecord) -> bool {
    record.current_usage_seconds >= record.daily_limit_seconds
}

/// Share of the daily limit used, capped at 100
pub fn percent_used(record: &UserUsageRecord) -> f64 {
    if record.daily_limit_seconds == 0 {
        return 100.0;
    }
    let percent = record.current_usage_seconds as f64 / record.daily_limit_seconds as f64 * 100.0;
    percent.min(100.0)
}

/// In-memory view of one user's record plus the accrual not yet persisted
pub struct UsageLedger {
    store: Arc<dyn AccountStore>,
    archive: Arc<dyn UsageArchive>,
    record: UserUsageRecord,
    unflushed_seconds: u64,
    dirty: bool,
}

impl UsageLedger {
    /// Load the user's record from the store
    pub fn load(
        store: Arc<dyn AccountStore>,
        archive: Arc<dyn UsageArchive>,
        user_id: &UserId,
    ) -> Result<Self> {
        let record = store.get_record(user_id)?;
        debug!(
            "Loaded record for {}: {}s of {}s used",
            user_id, record.current_usage_seconds, record.daily_limit_seconds
        );

        Ok(Self {
            store,
            archive,
            record,
            unflushed_seconds: 0,
            dirty: false,
        })
    }

    pub fn record(&self) -> &UserUsageRecord {
        &self.record
    }

    pub fn user_id(&self) -> &UserId {
        &self.record.user_id
    }

    pub fn is_blocked(&self) -> bool {
        is_blocked(&self.record)
    }

    pub fn percent_used(&self) -> f64 {
        percent_used(&self.record)
    }

    /// Seconds accrued locally that the store has not acknowledged yet
    pub fn unflushed_seconds(&self) -> u64 {
        self.unflushed_seconds
    }

    pub fn has_pending_writes(&self) -> bool {
        self.dirty
    }

    /// Reset the counter on a new day, archive the prior total and persist.
    ///
    /// Returns whether a reset happened. A failed write leaves the reset in
    /// memory; the next flush persists it.
    pub fn roll_over_if_needed(&mut self, today: NaiveDate) -> Result<bool> {
        let Rollover { record, archived } = apply_rollover_if_needed(&self.record, today);
        let Some(archived) = archived else {
            return Ok(false);
        };

        info!(
            "New day for {}: resetting {}s of usage from {}",
            self.record.user_id, archived.usage_seconds, archived.date
        );

        self.record = record;
        self.unflushed_seconds = 0;
        self.dirty = true;

        if archived.usage_seconds > 0 {
            if let Err(e) = self.archive.archive(archived) {
                warn!("Failed to archive prior day usage: {:#}", e);
            }
        }

        self.flush()?;
        Ok(true)
    }

    /// Accrue locally; call `flush` to persist
    pub fn accrue<Tz: TimeZone>(&mut self, delta_seconds: u64, now: DateTime<Tz>) {
        self.record = accrue(&self.record, delta_seconds, now);
        self.unflushed_seconds = self.unflushed_seconds.saturating_add(delta_seconds);
        self.dirty = true;
    }

    /// Persist the accrual-owned fields as absolute values
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        self.store
            .update_record(&self.record.user_id, &RecordPatch::usage_of(&self.record))?;

        debug!(
            "Flushed {}s of usage for {} (total {}s)",
            self.unflushed_seconds, self.record.user_id, self.record.current_usage_seconds
        );
        self.unflushed_seconds = 0;
        self.dirty = false;
        Ok(())
    }

    /// Validate and persist a new limit; memory changes only after the store accepts it
    pub fn set_limit(&mut self, new_limit_minutes: i64) -> Result<()> {
        let updated = set_limit(&self.record, new_limit_minutes)?;

        self.store.update_record(
            &self.record.user_id,
            &RecordPatch::limit(updated.daily_limit_seconds),
        )?;

        info!(
            "Daily limit for {} set to {} minutes",
            self.record.user_id, new_limit_minutes
        );
        self.record.daily_limit_seconds = updated.daily_limit_seconds;
        Ok(())
    }

    /// Merge a record pushed by the store.
    ///
    /// Remote fields win, except usage: the local session owns it until its
    /// accrual is flushed.
    pub fn absorb_remote(&mut self, remote: UserUsageRecord) {
        if remote.user_id != self.record.user_id {
            warn!(
                "Ignoring remote record for {} in ledger of {}",
                remote.user_id, self.record.user_id
            );
            return;
        }

        let mut merged = remote;

        if merged.last_reset_date == self.record.last_reset_date {
            let flushed = self.record.current_usage_seconds.saturating_sub(self.unflushed_seconds);
            merged.current_usage_seconds = merged
                .current_usage_seconds
                .max(flushed)
                .saturating_add(self.unflushed_seconds);
            merged.last_updated = merged.last_updated.max(self.record.last_updated);
        } else if merged.last_reset_date > self.record.last_reset_date {
            // Another device already rolled the day over; pre-rollover accrual belongs to its archive
            debug!(
                "Remote rollover for {} to {}; dropping {}s of unflushed usage",
                merged.user_id, merged.last_reset_date, self.unflushed_seconds
            );
            self.unflushed_seconds = 0;
            self.dirty = false;
        } else {
            // Stale echo from before our own rollover
            merged.current_usage_seconds = self.record.current_usage_seconds;
            merged.last_reset_date = self.record.last_reset_date;
            merged.last_updated = self.record.last_updated;
        }

        self.record = merged;
    }
}
