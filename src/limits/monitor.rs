use chrono::{DateTime, Duration, Local};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::enforcement::{UiEvent, UiSurface};
use super::ledger::UsageLedger;
use super::record::UserUsageRecord;
use crate::error::{LimiterError, Result};

/// Default number of failed flushes in a row before the user is told
pub const DEFAULT_MAX_FLUSH_FAILURES: u32 = 3;

/// Enforcement state of the signed-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Tracking {
        started_at: DateTime<Local>,
        /// Time up to which usage has been accrued
        last_tick: DateTime<Local>,
    },
    Blocked,
}

impl MonitorState {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Tracking { .. } => "tracking",
            MonitorState::Blocked => "blocked",
        }
    }
}

/// Answer to a request to open the restricted site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access granted; the visit is being tracked
    Tracking,
    /// Daily limit reached; overlay shown instead
    Blocked,
    /// The site is not restricted
    Unrestricted,
    /// Usage data unavailable; access allowed without enforcement
    Untracked,
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub record: UserUsageRecord,
    pub percent_used: f64,
    pub unflushed_seconds: u64,
    pub consecutive_flush_failures: u32,
}

/// Decides tracking and blocking for one user and drives the UI side effects.
///
/// Every method takes the current time explicitly; timers live in the tracker.
pub struct EnforcementMonitor {
    ledger: UsageLedger,
    surface: Arc<dyn UiSurface>,
    state: MonitorState,
    max_flush_failures: u32,
    consecutive_flush_failures: u32,
    last_progress: Option<u32>,
}

impl EnforcementMonitor {
    pub fn new(ledger: UsageLedger, surface: Arc<dyn UiSurface>, max_flush_failures: u32) -> Self {
        Self {
            ledger,
            surface,
            state: MonitorState::Idle,
            max_flush_failures: max_flush_failures.max(1),
            consecutive_flush_failures: 0,
            last_progress: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, MonitorState::Tracking { .. })
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            record: self.ledger.record().clone(),
            percent_used: self.ledger.percent_used(),
            unflushed_seconds: self.ledger.unflushed_seconds(),
            consecutive_flush_failures: self.consecutive_flush_failures,
        }
    }

    /// User asks to open the restricted site
    pub fn request_access(&mut self, now: DateTime<Local>) -> AccessDecision {
        let was_blocked = self.state == MonitorState::Blocked;

        if !self.is_tracking() {
            self.roll_over(now);
        }
        self.evaluate(now);

        match self.state {
            MonitorState::Blocked => {
                if was_blocked {
                    info!("Access to restricted site refused: daily limit reached");
                    self.show_overlay();
                }
                AccessDecision::Blocked
            }
            MonitorState::Tracking { .. } => AccessDecision::Tracking,
            MonitorState::Idle => {
                info!("Tracking session started for {}", self.ledger.user_id());
                self.state = MonitorState::Tracking {
                    started_at: now,
                    last_tick: now,
                };
                AccessDecision::Tracking
            }
        }
    }

    /// Accrual tick while a session is open
    pub fn tick(&mut self, now: DateTime<Local>) {
        if !self.is_tracking() {
            return;
        }

        self.roll_over(now);
        self.accrue_elapsed(now);
        self.flush();
        self.evaluate(now);
    }

    /// The tracked site window went away
    pub fn site_closed(&mut self, now: DateTime<Local>) {
        let MonitorState::Tracking { started_at, .. } = self.state else {
            return;
        };

        self.accrue_elapsed(now);
        self.flush();
        self.state = MonitorState::Idle;
        info!(
            "Tracking session ended after {}s",
            (now - started_at).num_seconds().max(0)
        );
        self.evaluate(now);
    }

    /// Periodic block-status check; reads usage, never accrues it
    pub fn poll_status(&mut self, now: DateTime<Local>) {
        if !self.is_tracking() {
            self.roll_over(now);
        }
        self.evaluate(now);
    }

    /// Record pushed by the account store
    pub fn absorb_remote(&mut self, record: UserUsageRecord, now: DateTime<Local>) {
        debug!("Remote update for {}", record.user_id);
        self.ledger.absorb_remote(record);
        self.evaluate(now);
    }

    /// Change the daily limit on the user's request
    pub fn set_limit(&mut self, minutes: i64, now: DateTime<Local>) -> Result<()> {
        self.ledger.set_limit(minutes)?;
        self.evaluate(now);
        Ok(())
    }

    /// Stop enforcement, saving whatever has been accrued
    pub fn shutdown(&mut self, now: DateTime<Local>) {
        if self.is_tracking() {
            self.accrue_elapsed(now);
        }
        if self.ledger.has_pending_writes() {
            self.flush();
        }
        if self.state == MonitorState::Blocked {
            self.surface.emit(UiEvent::HideBlockOverlay);
        }
        self.state = MonitorState::Idle;
    }

    fn roll_over(&mut self, now: DateTime<Local>) {
        match self.ledger.roll_over_if_needed(now.date_naive()) {
            Ok(_) => {}
            Err(e) => self.record_flush_failure(e),
        }
    }

    /// Accrue whole seconds since the last tick; the sub-second rest carries over
    fn accrue_elapsed(&mut self, now: DateTime<Local>) -> u64 {
        let MonitorState::Tracking { last_tick, .. } = &mut self.state else {
            return 0;
        };

        let elapsed = (now - *last_tick).num_seconds();
        if elapsed < 0 {
            warn!("Clock moved backwards by {}s; not accruing", -elapsed);
            *last_tick = now;
            return 0;
        }
        if elapsed == 0 {
            return 0;
        }

        *last_tick += Duration::seconds(elapsed);
        self.ledger.accrue(elapsed as u64, now);
        elapsed as u64
    }

    fn flush(&mut self) {
        match self.ledger.flush() {
            Ok(()) => {
                if self.consecutive_flush_failures > 0 {
                    info!(
                        "Usage saved after {} failed attempts",
                        self.consecutive_flush_failures
                    );
                }
                self.consecutive_flush_failures = 0;
            }
            Err(e) => self.record_flush_failure(e),
        }
    }

    fn record_flush_failure(&mut self, e: LimiterError) {
        self.consecutive_flush_failures += 1;
        let attempts = self.consecutive_flush_failures;

        if attempts == self.max_flush_failures {
            error!("Failed to save usage {} times in a row: {}", attempts, e);
            self.surface.emit(UiEvent::SyncDegraded {
                consecutive_failures: attempts,
            });
        } else {
            warn!("Failed to save usage (attempt {}), retrying next tick: {}", attempts, e);
        }
    }

    fn evaluate(&mut self, now: DateTime<Local>) {
        let blocked = self.ledger.is_blocked();

        match (self.state, blocked) {
            (MonitorState::Tracking { .. }, true) => {
                if self.accrue_elapsed(now) > 0 {
                    self.flush();
                }
                self.enter_blocked();
            }
            (MonitorState::Idle, true) => self.enter_blocked(),
            (MonitorState::Blocked, false) => {
                info!("Usage is below the daily limit again; unblocking");
                self.state = MonitorState::Idle;
                self.surface.emit(UiEvent::HideBlockOverlay);
            }
            _ => {}
        }

        self.report_progress();
    }

    fn enter_blocked(&mut self) {
        let record = self.ledger.record();
        info!(
            "Daily limit reached for {}: {}s used of {}s",
            record.user_id, record.current_usage_seconds, record.daily_limit_seconds
        );
        self.state = MonitorState::Blocked;
        self.show_overlay();
        self.surface.emit(UiEvent::PauseMedia);
    }

    fn show_overlay(&self) {
        self.surface.emit(UiEvent::ShowBlockOverlay {
            limit_minutes: self.ledger.record().limit_minutes(),
        });
    }

    fn report_progress(&mut self) {
        let percent = self.ledger.percent_used();
        let rounded = percent.round() as u32;
        if self.last_progress != Some(rounded) {
            self.last_progress = Some(rounded);
            self.surface.emit(UiEvent::UpdateProgress {
                percent_used: percent,
            });
        }
    }
}
